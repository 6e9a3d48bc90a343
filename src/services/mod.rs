pub mod disk_backend;
pub mod naming;
pub mod object_store_backend;
pub mod storage_service;
pub mod upload_service;
