/// Placeholder written when a value cannot be rendered.
pub const UNREADABLE: &str = "**UNREADABLE**";

/// A value that can be recorded as a telemetry property.
///
/// Properties are always sent as strings. Structured values are rendered as JSON
/// at the moment they are added to a context.
pub struct PropertyValue(PropertyValueInner);

enum PropertyValueInner {
    String(String),
    Debug(Box<dyn std::fmt::Debug + Send + Sync + 'static>),
    Display(Box<dyn std::fmt::Display + Send + Sync + 'static>),
    Serde(Box<dyn erased_serde::Serialize + Send + Sync + 'static>),
}

impl From<PropertyValueInner> for PropertyValue {
    fn from(inner: PropertyValueInner) -> Self {
        Self(inner)
    }
}

impl PropertyValue {
    pub fn serde<S>(value: S) -> Self
    where
        S: serde::Serialize + Send + Sync + 'static,
    {
        let value = Box::new(value);
        PropertyValueInner::Serde(value).into()
    }

    pub fn display<T>(value: T) -> Self
    where
        T: std::fmt::Display + Send + Sync + 'static,
    {
        let value = Box::new(value);
        PropertyValueInner::Display(value).into()
    }

    pub fn debug<T>(value: T) -> Self
    where
        T: std::fmt::Debug + Send + Sync + 'static,
    {
        let value = Box::new(value);
        PropertyValueInner::Debug(value).into()
    }

    /// Renders the value as a property string.
    ///
    /// # Errors
    ///
    /// Returns an error if a serde value fails to serialize.
    pub fn try_render(&self) -> crate::Result<String> {
        Ok(match &self.0 {
            PropertyValueInner::String(s) => s.clone(),
            PropertyValueInner::Display(value) => value.to_string(),
            PropertyValueInner::Debug(value) => format!("{value:?}"),
            PropertyValueInner::Serde(value) => serde_json::to_string(value)?,
        })
    }

    /// Renders the value, falling back to [`UNREADABLE`] on failure.
    #[must_use]
    pub fn render(&self) -> String {
        self.try_render().unwrap_or_else(|_| UNREADABLE.to_owned())
    }
}

impl std::fmt::Debug for PropertyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PropertyValue").field(&self.render()).finish()
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValueInner::String(value.to_owned()).into()
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValueInner::String(value).into()
    }
}

macro_rules! impl_from_display {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for PropertyValue {
                fn from(value: $ty) -> Self {
                    PropertyValueInner::String(value.to_string()).into()
                }
            }
        )*
    };
}

impl_from_display!(bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64);

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use pretty_assertions::assert_eq;

    use super::*;

    struct Unserializable;

    impl serde::Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("refused"))
        }
    }

    #[test]
    fn test_render_variants() {
        assert_eq!(PropertyValue::from("plain").render(), "plain");
        assert_eq!(PropertyValue::from(42).render(), "42");
        assert_eq!(PropertyValue::from(true).render(), "true");
        assert_eq!(PropertyValue::debug(Some(1)).render(), "Some(1)");

        let map = BTreeMap::from([("a", 1), ("b", 2)]);
        assert_eq!(PropertyValue::serde(map).render(), r#"{"a":1,"b":2}"#);
    }

    #[test]
    fn test_serialization_failure_is_unreadable() {
        let value = PropertyValue::serde(Unserializable);
        assert!(value.try_render().is_err());
        assert_eq!(value.render(), UNREADABLE);
    }
}
