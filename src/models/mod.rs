//! Data carried between the HTTP layer, the upload service and the storage
//! backends.

pub mod object;
pub mod upload;
