/// Print license and third-party attribution information.
pub fn run() {
    println!(
        "\
starstack {version}
This program comes with ABSOLUTELY NO WARRANTY. This is free software,
and you are welcome to redistribute it under certain conditions.

ATTRIBUTIONS

starstack builds on the following open source crates, each under its own
license terms:

  ndarray             MIT OR Apache-2.0
  rayon               MIT OR Apache-2.0
  thiserror           MIT OR Apache-2.0
  serde               MIT OR Apache-2.0
  tracing             MIT
  tracing-subscriber  MIT
  rand, rand_chacha   MIT OR Apache-2.0
  byteorder           MIT OR Unlicense
  clap                MIT OR Apache-2.0
  indicatif           MIT
  anyhow              MIT OR Apache-2.0

See each crate's repository for the full license text.",
        version = env!("CARGO_PKG_VERSION")
    );
}
