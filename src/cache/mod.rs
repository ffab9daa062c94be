// Content-addressable module cache: addressing, MIME table and stores.

pub mod address;
pub mod mime;
pub mod store;
