use std::ffi::OsString;

use anyhow::Result;

fn main() -> Result<()> {
    frida_compile::cli::run(None::<Vec<OsString>>)
}
