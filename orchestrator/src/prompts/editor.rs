//! Editor persona

pub const EDITOR_PROMPT: &str = "You are an editor agent that edits blog post copy.";

pub const EDITOR_TASK: &str = "Edit the following blog post only returning the edited copy: {copy}";
