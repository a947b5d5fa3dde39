use crate::util::named::named_enum;

named_enum! {
  /// CPU architectures a target can be compiled for.
  pub enum Architecture: "architecture" {
    /// Architecture-neutral output (managed assemblies, data).
    AnyCpu => "AnyCPU",
    X86 => "x86" | "i686",
    X64 => "x64" | "x86_64" | "amd64",
    Arm => "ARM",
    Arm64 => "ARM64" | "aarch64",
  }
}

impl Architecture {
  /// Detect the CPU architecture of the machine running the build
  pub fn current() -> Option<Self> {
    match std::env::consts::ARCH {
      "x86_64" => Some(Self::X64),
      "x86" => Some(Self::X86),
      "aarch64" => Some(Self::Arm64),
      "arm" => Some(Self::Arm),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rust_arch_names_are_aliases() {
    assert_eq!("x86_64".parse::<Architecture>().unwrap(), Architecture::X64);
    assert_eq!("aarch64".parse::<Architecture>().unwrap(), Architecture::Arm64);
    assert_eq!(Architecture::X64.as_str(), "x64");
  }
}
