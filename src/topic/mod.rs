//! Topic templates and topic path building
//!
//! A template such as `rtl_433/[hostname]/devices[/type][/model][/id]`
//! mixes literal text with bracketed tokens. Tokens are resolved against
//! the top-level fields of an event (or the local hostname) and rendered
//! into a [`TopicBuffer`], a bounded path builder with push/pop marks.

mod buffer;
mod template;
pub mod validation;


pub use buffer::{TopicBuffer, TopicError, TopicMark, DEFAULT_TOPIC_CAPACITY};
pub use template::{TemplateError, TokenKey, TopicTemplate};
pub use validation::validate_topic_name;

/// Replace every character outside `[A-Za-z0-9.-]` with `_`
///
/// Keeps topic levels free of whitespace, `/`, `+`, `#` and `$`.
pub fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
