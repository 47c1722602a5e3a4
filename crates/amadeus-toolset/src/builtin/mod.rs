//! Built-in tools.
//!
//! These run in-process. File-writing tools and the shell request approval
//! before touching anything.

mod dmail;
mod file;
mod shell;
mod task;
mod todo;

pub use dmail::{SEND_DMAIL_NAME, SendDMail};
pub use file::{ReadFile, StrReplace, WriteFile};
pub use shell::Shell;
pub use task::Task;
pub use todo::SetTodoList;
