//! Topic-to-schema registry and topic naming rules.
//!
//! Every topic the bridge touches carries exactly one [`Schema`].  The
//! registry is filled once at start-up (usually from the `[[topics]]` table
//! of the bridge config) and consulted on every publish and subscribe.

use std::collections::BTreeMap;

use horas_types::{BridgeError, Schema};

/// Check that `topic` is a well-formed, slash-separated key.
///
/// Rejected: the empty string, a leading or trailing `/`, empty segments
/// (`a//b`) and any whitespace.
pub fn validate_topic(topic: &str) -> Result<(), BridgeError> {
    let malformed = topic.is_empty()
        || topic.starts_with('/')
        || topic.ends_with('/')
        || topic.contains("//")
        || topic.chars().any(char::is_whitespace);
    if malformed {
        return Err(BridgeError::InvalidTopic(topic.to_string()));
    }
    Ok(())
}

/// Fixed association between topics and the schema each one carries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopicRegistry {
    topics: BTreeMap<String, Schema>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate `topic` with `schema`.
    ///
    /// Registering the same pair twice is accepted.  Re-registering a topic
    /// under a different schema fails with [`BridgeError::SchemaMismatch`].
    pub fn register(&mut self, topic: impl Into<String>, schema: Schema) -> Result<(), BridgeError> {
        let topic = topic.into();
        validate_topic(&topic)?;
        match self.topics.get(&topic) {
            Some(&registered) if registered != schema => Err(BridgeError::SchemaMismatch {
                topic,
                registered,
                requested: schema,
            }),
            Some(_) => Ok(()),
            None => {
                self.topics.insert(topic, schema);
                Ok(())
            }
        }
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, topic: impl Into<String>, schema: Schema) -> Result<Self, BridgeError> {
        self.register(topic, schema)?;
        Ok(self)
    }

    pub fn schema_for(&self, topic: &str) -> Option<Schema> {
        self.topics.get(topic).copied()
    }

    /// Schema of a registered, well-formed topic.
    pub fn resolve(&self, topic: &str) -> Result<Schema, BridgeError> {
        validate_topic(topic)?;
        self.schema_for(topic)
            .ok_or_else(|| BridgeError::UnregisteredTopic(topic.to_string()))
    }

    /// Like [`resolve`](Self::resolve), but also require `requested` to be
    /// the registered schema.
    pub fn require(&self, topic: &str, requested: Schema) -> Result<(), BridgeError> {
        let registered = self.resolve(topic)?;
        if registered != requested {
            return Err(BridgeError::SchemaMismatch {
                topic: topic.to_string(),
                registered,
                requested,
            });
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Schema)> {
        self.topics.iter().map(|(topic, schema)| (topic.as_str(), *schema))
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

/// The raw command and reply topics of one sight device.
///
/// Commands go out on `<node>/sight/<device>/tx/raw`; the device answers on
/// `<node>/sight/<device>/rx/raw`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SightTopics {
    pub tx: String,
    pub rx: String,
}

impl SightTopics {
    pub fn new(node: &str, device: &str) -> Self {
        let prefix = format!("{node}/sight/{device}");
        Self {
            tx: format!("{prefix}/tx/raw"),
            rx: format!("{prefix}/rx/raw"),
        }
    }

    /// Laser range finder topics.
    pub fn lrf(node: &str) -> Self {
        Self::new(node, "lrf")
    }

    /// Thermal camera topics.  The camera sends no typed reply, so only
    /// [`tx`](Self::tx) is normally registered.
    pub fn thermal(node: &str) -> Self {
        Self::new(node, "thermal")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_rules() {
        for good in ["can/tx/raw", "horas/gnss/state", "motors", "a_b/c-d/e.f"] {
            assert!(validate_topic(good).is_ok(), "{good} should be valid");
        }
        for bad in ["", "/can", "can/", "can//tx", "can tx", "can/\t"] {
            assert!(
                matches!(validate_topic(bad), Err(BridgeError::InvalidTopic(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn register_is_idempotent_per_schema() {
        let mut registry = TopicRegistry::new();
        registry.register("can/tx/raw", Schema::Can).unwrap();
        registry.register("can/tx/raw", Schema::Can).unwrap();
        assert_eq!(registry.len(), 1);

        let err = registry.register("can/tx/raw", Schema::Gnss).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::SchemaMismatch {
                registered: Schema::Can,
                requested: Schema::Gnss,
                ..
            }
        ));
    }

    #[test]
    fn resolve_and_expect() {
        let registry = TopicRegistry::new()
            .with("horas/gnss/state", Schema::Gnss)
            .unwrap();

        assert_eq!(registry.resolve("horas/gnss/state").unwrap(), Schema::Gnss);
        assert!(matches!(
            registry.resolve("horas/unknown"),
            Err(BridgeError::UnregisteredTopic(_))
        ));
        assert!(matches!(
            registry.resolve("/horas/gnss/state"),
            Err(BridgeError::InvalidTopic(_))
        ));
        assert!(registry.require("horas/gnss/state", Schema::Gnss).is_ok());
        assert!(matches!(
            registry.require("horas/gnss/state", Schema::Motor),
            Err(BridgeError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn sight_topic_layout() {
        let lrf = SightTopics::lrf("horas");
        assert_eq!(lrf.tx, "horas/sight/lrf/tx/raw");
        assert_eq!(lrf.rx, "horas/sight/lrf/rx/raw");
        assert_eq!(SightTopics::thermal("n1").tx, "n1/sight/thermal/tx/raw");
    }
}
