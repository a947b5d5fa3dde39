use crate::util::named::named_enum;

named_enum! {
  /// Target platforms a project can declare support for.
  pub enum Platform: "platform" {
    Windows => "Windows" | "win64",
    Linux => "Linux",
    Mac => "Mac" | "macos" | "darwin",
    Android => "Android",
    IOS => "iOS",
    Switch => "Switch",
    PS5 => "PS5",
    XboxScarlett => "XboxScarlett",
  }
}

impl Platform {
  /// Detect the platform of the machine running the build
  pub fn current() -> Option<Self> {
    match std::env::consts::OS {
      "linux" => Some(Self::Linux),
      "macos" => Some(Self::Mac),
      "windows" => Some(Self::Windows),
      _ => None,
    }
  }

  /// Desktop platforms can host a build and load modules dynamically
  pub fn is_desktop(&self) -> bool {
    matches!(self, Self::Windows | Self::Linux | Self::Mac)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn current_returns_supported_platform() {
    assert!(Platform::current().is_some(), "host platform should be recognized");
  }

  #[test]
  fn parses_aliases() {
    assert_eq!("darwin".parse::<Platform>().unwrap(), Platform::Mac);
    assert_eq!("ios".parse::<Platform>().unwrap(), Platform::IOS);
    assert_eq!(Platform::IOS.to_string(), "iOS");
  }

  #[test]
  fn consoles_are_not_desktop() {
    assert!(Platform::Linux.is_desktop());
    assert!(!Platform::PS5.is_desktop());
  }
}
