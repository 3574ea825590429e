//! Instructions and task templates for the blog-post personas
//!
//! Task templates use `{field}` placeholders filled from a tool or step input.

mod copywriter;
mod editor;
mod publisher;

pub use copywriter::{COPYWRITER_PROMPT, COPYWRITER_TASK};
pub use editor::{EDITOR_PROMPT, EDITOR_TASK};
pub use publisher::PUBLISHER_PROMPT;
