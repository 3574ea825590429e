//! Copywriter persona

pub const COPYWRITER_PROMPT: &str = "You are a copywriter agent that writes blog post copy.";

pub const COPYWRITER_TASK: &str = "Write a blog post about {topic}";
