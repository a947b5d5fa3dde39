//! Case-insensitive string names for the build matrix enums.
//!
//! Configurations, platforms and architectures are closed sets that appear in
//! manifests, on the command line and in cache paths. `named_enum!` generates
//! the enum together with its canonical name, case-insensitive parsing (with
//! optional aliases) and string-based serde.

use thiserror::Error;

/// A name that does not match any variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseNameError {
  pub kind: &'static str,
  pub value: String,
}

macro_rules! named_enum {
  (
    $(#[$meta:meta])*
    $vis:vis enum $name:ident : $kind:literal {
      $(
        $(#[$vmeta:meta])*
        $variant:ident => $canonical:literal $(| $alias:literal)*
      ),+ $(,)?
    }
  ) => {
    $(#[$meta])*
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
    #[serde(try_from = "String", into = "String")]
    $vis enum $name {
      $( $(#[$vmeta])* $variant ),+
    }

    impl $name {
      /// Every variant, in declaration order.
      pub const ALL: &'static [$name] = &[$($name::$variant),+];

      /// Canonical name used in manifests, logs and output paths.
      pub fn as_str(&self) -> &'static str {
        match self {
          $($name::$variant => $canonical),+
        }
      }
    }

    impl std::fmt::Display for $name {
      fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
      }
    }

    impl std::str::FromStr for $name {
      type Err = $crate::util::named::ParseNameError;

      fn from_str(s: &str) -> Result<Self, Self::Err> {
        $(
          if s.eq_ignore_ascii_case($canonical) $(|| s.eq_ignore_ascii_case($alias))* {
            return Ok($name::$variant);
          }
        )+
        Err($crate::util::named::ParseNameError {
          kind: $kind,
          value: s.to_string(),
        })
      }
    }

    impl TryFrom<String> for $name {
      type Error = $crate::util::named::ParseNameError;

      fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
      }
    }

    impl From<$name> for String {
      fn from(value: $name) -> String {
        value.as_str().to_string()
      }
    }
  };
}

pub(crate) use named_enum;
