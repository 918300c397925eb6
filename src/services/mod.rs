pub mod bucket_selector;
pub mod keys;
pub mod object_store;
pub mod pipeline;
pub mod tag_index;
pub mod transcoder;
pub mod upload_service;
