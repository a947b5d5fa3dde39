use weft_lib::platform::{Architecture, HostPlatform};

use crate::output::print_stat;

pub fn cmd_info() {
  println!("weft {}", env!("CARGO_PKG_VERSION"));
  match HostPlatform::current() {
    Some(host) => {
      print_stat("Platform", host.platform.as_str());
      print_stat("Architecture", host.arch.as_str());
      print_stat("Buildable", &format!("{host}, {}-{}", host.platform, Architecture::AnyCpu));
    }
    None => println!("Could not detect platform."),
  }
}
