use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status carried by every long-lived entity.
///
/// `S` is the entity's closed state enum and `R` its closed reason enum; which
/// reasons are valid for which state is owned by the state machine in
/// `scanwarden-core`, not by this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status<S, R> {
    pub state: S,
    pub reason: R,
    #[serde(default)]
    pub message: Option<String>,
    pub last_transition_time: DateTime<Utc>,
}

impl<S, R> Status<S, R> {
    /// Builds a status stamped with the current time.
    pub fn new(state: S, reason: R, message: Option<String>) -> Self {
        Self {
            state,
            reason,
            message,
            last_transition_time: Utc::now(),
        }
    }

    pub fn with_message(state: S, reason: R, message: impl Into<String>) -> Self {
        Self::new(state, reason, Some(message.into()))
    }
}

/// Declares a closed state or reason enum with a stable string form used on
/// the wire, in filters and in log lines.
macro_rules! status_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => stringify!($variant)),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl From<$name> for $crate::filter::Literal {
            fn from(value: $name) -> Self {
                $crate::filter::Literal::Str(value.as_str().to_string())
            }
        }
    };
}

pub(crate) use status_enum;

#[cfg(test)]
mod tests {
    use super::*;

    status_enum!(Light { Red, Green });

    #[test]
    fn message_is_serialized_even_when_absent() {
        let status = Status::new(Light::Red, Light::Green, None);
        let value = serde_json::to_value(&status).unwrap();
        assert!(value.get("message").is_some_and(|m| m.is_null()));
        assert_eq!(value["state"], "Red");
        assert!(value.get("lastTransitionTime").is_some());
    }

    #[test]
    fn enum_listing_matches_declaration_order() {
        assert_eq!(Light::ALL, &[Light::Red, Light::Green]);
        assert_eq!(Light::Green.to_string(), "Green");
    }
}
