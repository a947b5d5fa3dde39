pub mod arch;
pub mod os;

pub use arch::Architecture;
pub use os::Platform;

use std::fmt;

/// The platform and architecture of the machine running the build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostPlatform {
  pub platform: Platform,
  pub arch: Architecture,
}

impl HostPlatform {
  pub fn new(platform: Platform, arch: Architecture) -> Self {
    Self { platform, arch }
  }

  /// Detect the host at runtime
  ///
  /// Returns `None` if the OS or architecture is not recognized
  pub fn current() -> Option<Self> {
    Some(Self {
      platform: Platform::current()?,
      arch: Architecture::current()?,
    })
  }

  /// Returns the host triple string (e.g., "Linux-x64")
  pub fn triple(&self) -> String {
    format!("{}-{}", self.platform, self.arch)
  }
}

impl fmt::Display for HostPlatform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.triple())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn triple_format() {
    let host = HostPlatform::new(Platform::Mac, Architecture::Arm64);
    assert_eq!(host.triple(), "Mac-ARM64");

    let host = HostPlatform::new(Platform::Linux, Architecture::X64);
    assert_eq!(host.to_string(), "Linux-x64");
  }
}
