mod os_file;
mod os_handler;
mod os_path;

#[cfg(test)]
pub(crate) mod mem_fs;

pub use os_file::OsRandomAccess;
pub use os_handler::{HandlerConfig, OsFsHandler};
pub use os_path::OsPath;
