pub mod alias;
mod app;
pub mod backup;
pub mod command;
mod error;
pub mod fs;
pub mod host;
mod input;
pub mod invocation;
pub mod logging;
pub mod metadata;
pub mod probe;
pub mod registry;
mod select_box;
pub mod settings;
pub mod sshconfig;
mod terminal;
pub mod validate;

pub use app::{Action, App, CRATE_NAME};
pub use error::{Error, ErrorKind, Result};
pub use host::{Category, Host, Options, SshOption};
pub use registry::{HostRepository, MemoryRepository, SortMode, SshConfigRepository};
pub use settings::Settings;
pub use terminal::Terminal;
