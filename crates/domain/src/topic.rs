//! Topic codec: canonical `status`/`set` namespaces and their aliases.
//!
//! Canonical topics are `<root>/status/<path>` (authoritative last value) and
//! `<root>/set/<path>` (change request). Two aliases are understood:
//!
//! - `$path` stands for the variable root's status namespace;
//! - `root//path` stands for `root/status/path` on read and
//!   `root/set/path` on write.

/// Segment delimiter.
pub const DELIMITER: char = '/';
/// Namespace holding authoritative values.
pub const STATUS: &str = "status";
/// Namespace holding change requests.
pub const SET: &str = "set";

const VARIABLE_SIGIL: char = '$';

/// Where a `setValue` call must go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteTarget {
    /// A topic under the variable root.
    Variable { status: String, set: String },
    /// Any other topic; the value is published as-is to `topic`.
    Remote { topic: String },
}

/// Translates aliases into canonical topics for one configured variable root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicCodec {
    variable_root: String,
}

impl TopicCodec {
    #[must_use]
    pub fn new(variable_root: impl Into<String>) -> Self {
        Self {
            variable_root: variable_root.into(),
        }
    }

    #[must_use]
    pub fn variable_root(&self) -> &str {
        &self.variable_root
    }

    /// Resolve a topic for reading or subscribing.
    #[must_use]
    pub fn status_topic(&self, topic: &str) -> String {
        if let Some(path) = topic.strip_prefix(VARIABLE_SIGIL) {
            return join(&self.variable_root, STATUS, path);
        }
        match split_alias(topic) {
            Some((root, path)) => join(root, STATUS, path),
            None => topic.to_string(),
        }
    }

    /// Resolve a topic for `setValue`.
    #[must_use]
    pub fn write_target(&self, topic: &str) -> WriteTarget {
        if let Some(path) = topic.strip_prefix(VARIABLE_SIGIL) {
            return self.variable(path);
        }
        let Some((root, rest)) = topic.split_once(DELIMITER) else {
            return WriteTarget::Remote {
                topic: topic.to_string(),
            };
        };
        if root == self.variable_root {
            let path = rest
                .strip_prefix(DELIMITER)
                .or_else(|| strip_namespace(rest, STATUS))
                .or_else(|| strip_namespace(rest, SET))
                .unwrap_or(rest);
            return self.variable(path);
        }
        match rest.strip_prefix(DELIMITER) {
            Some(path) => WriteTarget::Remote {
                topic: join(root, SET, path),
            },
            None => WriteTarget::Remote {
                topic: topic.to_string(),
            },
        }
    }

    /// The form handed to callbacks: `root/status/path` becomes `root//path`.
    #[must_use]
    pub fn display_topic(topic: &str) -> String {
        if let Some((root, rest)) = topic.split_once(DELIMITER)
            && let Some(path) = strip_namespace(rest, STATUS)
            && !path.is_empty()
        {
            return format!("{root}//{path}");
        }
        topic.to_string()
    }

    /// Whether the topic lives under the variable root.
    #[must_use]
    pub fn is_variable(&self, topic: &str) -> bool {
        topic.split(DELIMITER).next() == Some(self.variable_root.as_str())
    }

    /// Map `<var>/set/<path>` to `<var>/status/<path>`; `None` for anything else.
    #[must_use]
    pub fn variable_set_to_status(&self, topic: &str) -> Option<String> {
        let (root, rest) = topic.split_once(DELIMITER)?;
        if root != self.variable_root {
            return None;
        }
        strip_namespace(rest, SET).map(|path| join(root, STATUS, path))
    }

    fn variable(&self, path: &str) -> WriteTarget {
        WriteTarget::Variable {
            status: join(&self.variable_root, STATUS, path),
            set: join(&self.variable_root, SET, path),
        }
    }
}

impl Default for TopicCodec {
    fn default() -> Self {
        Self::new("var")
    }
}

fn join(root: &str, namespace: &str, path: &str) -> String {
    format!("{root}{DELIMITER}{namespace}{DELIMITER}{path}")
}

/// `root//path` → `(root, path)`.
fn split_alias(topic: &str) -> Option<(&str, &str)> {
    let (root, rest) = topic.split_once(DELIMITER)?;
    if root.is_empty() {
        return None;
    }
    rest.strip_prefix(DELIMITER).map(|path| (root, path))
}

fn strip_namespace<'a>(rest: &'a str, namespace: &str) -> Option<&'a str> {
    rest.strip_prefix(namespace)?.strip_prefix(DELIMITER)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> TopicCodec {
        TopicCodec::new("var")
    }

    #[test]
    fn should_expand_sigil_to_variable_status() {
        assert_eq!(codec().status_topic("$x"), "var/status/x");
        assert_eq!(codec().status_topic("$a/b"), "var/status/a/b");
    }

    #[test]
    fn should_expand_double_delimiter_to_status_on_read() {
        assert_eq!(codec().status_topic("hm//lamp/on"), "hm/status/lamp/on");
    }

    #[test]
    fn should_leave_canonical_topics_untouched() {
        assert_eq!(codec().status_topic("hm/status/lamp"), "hm/status/lamp");
        assert_eq!(codec().status_topic("plain"), "plain");
    }

    #[test]
    fn should_route_sigil_write_to_variable() {
        assert_eq!(
            codec().write_target("$x"),
            WriteTarget::Variable {
                status: "var/status/x".to_string(),
                set: "var/set/x".to_string(),
            }
        );
    }

    #[test]
    fn should_route_variable_root_forms_to_variable() {
        let expected = WriteTarget::Variable {
            status: "var/status/x".to_string(),
            set: "var/set/x".to_string(),
        };
        assert_eq!(codec().write_target("var//x"), expected);
        assert_eq!(codec().write_target("var/status/x"), expected);
        assert_eq!(codec().write_target("var/set/x"), expected);
        assert_eq!(codec().write_target("var/x"), expected);
    }

    #[test]
    fn should_route_double_delimiter_write_to_set_namespace() {
        assert_eq!(
            codec().write_target("hm//lamp"),
            WriteTarget::Remote {
                topic: "hm/set/lamp".to_string()
            }
        );
    }

    #[test]
    fn should_publish_other_writes_verbatim() {
        assert_eq!(
            codec().write_target("zigbee/lamp/cmd"),
            WriteTarget::Remote {
                topic: "zigbee/lamp/cmd".to_string()
            }
        );
    }

    #[test]
    fn should_shorten_status_topics_for_display() {
        assert_eq!(TopicCodec::display_topic("hm/status/lamp"), "hm//lamp");
        assert_eq!(TopicCodec::display_topic("hm/set/lamp"), "hm/set/lamp");
        assert_eq!(TopicCodec::display_topic("single"), "single");
    }

    #[test]
    fn should_recognise_variable_topics() {
        assert!(codec().is_variable("var/status/x"));
        assert!(!codec().is_variable("variable/status/x"));
        assert!(!codec().is_variable("hm/status/x"));
    }

    #[test]
    fn should_map_variable_set_to_status() {
        assert_eq!(
            codec().variable_set_to_status("var/set/x/y"),
            Some("var/status/x/y".to_string())
        );
        assert_eq!(codec().variable_set_to_status("var/status/x"), None);
        assert_eq!(codec().variable_set_to_status("hm/set/x"), None);
    }
}
