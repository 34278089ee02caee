//! wikihelper-dify
//!
//! Client for the Dify chat API: request/response models, the blocking and
//! streaming endpoints, and the decoder that turns a `data: {json}` response
//! body into chat events.

pub mod backend;
pub mod client;
pub mod error;
pub mod stream;
pub mod wire;
