//! Command line parsing exposed via the library for embedders.

use std::ffi::OsString;
use std::path::PathBuf;

use anyhow::Result;
use structopt::StructOpt;

use crate::bundler::Options;
use crate::paths;
use crate::system::{HostSystem, System};
use crate::watch::{WatchNotification, WatchSession};

#[derive(StructOpt)]
#[structopt(name = "frida-compile", about = "Compile an agent into a loadable bundle")]
struct CompileArgs {
    /// Agent entrypoint
    #[structopt(parse(from_os_str))]
    entrypoint: PathBuf,

    /// Write the bundle to this file
    #[structopt(short, long, parse(from_os_str))]
    output: PathBuf,

    /// Watch for changes and rebundle
    #[structopt(short, long)]
    watch: bool,

    /// Omit source maps
    #[structopt(short = "S", long = "no-source-maps")]
    no_source_maps: bool,

    /// Compress using the minifier
    #[structopt(short, long)]
    compress: bool,
}

/// Parse the given arguments list or `std::env::os_args` and run the program.
pub fn run<T>(argv: Option<Vec<T>>) -> Result<()>
where
    T: Into<OsString> + Clone,
{
    if std::env::var("RUST_LOG").ok().is_none() {
        std::env::set_var("RUST_LOG", "info");
    }
    pretty_env_logger::init();

    let app = CompileArgs::clap();
    let matches = if let Some(argv) = argv {
        app.get_matches_from(argv)
    } else {
        app.get_matches()
    };
    let args = CompileArgs::from_clap(&matches);

    let sys = HostSystem::new()?;
    let project_root = paths::to_posix(&sys.cwd());
    let entry_native = if args.entrypoint.is_absolute() {
        args.entrypoint.clone()
    } else {
        sys.cwd().join(&args.entrypoint)
    };
    let entry = paths::to_posix(&entry_native);
    let compiler_root = default_compiler_root(&sys, &project_root);

    let mut options = Options::new(&entry, &project_root, &compiler_root);
    options.source_maps = !args.no_source_maps;
    options.compress = args.compress;

    if args.watch {
        let output = args.output.clone();
        let mut session = WatchSession::new(&sys, options);
        session.run(&mut |notification| match notification {
            WatchNotification::CompilationStarting => {
                log::info!("compiling...");
            }
            WatchNotification::Diagnostic(diagnostic) => {
                eprintln!("{}", diagnostic);
            }
            WatchNotification::BundleUpdated(bundle) => {
                match std::str::from_utf8(bundle.as_bytes()) {
                    Ok(text) => {
                        if let Err(error) = sys.write_text(&output, text) {
                            log::error!("unable to write {}: {}", output.display(), error);
                        } else {
                            log::info!("bundle written to {}", output.display());
                        }
                    }
                    Err(error) => log::error!("bundle is not valid UTF-8: {}", error),
                }
            }
            WatchNotification::CompilationFinished => {
                log::debug!("compilation finished");
            }
        })?;
    } else {
        let bundle = crate::compile(&sys, options, &mut |diagnostic| {
            eprintln!("{}", diagnostic);
        })?;
        let text = std::str::from_utf8(bundle.as_bytes())?;
        sys.write_text(&args.output, text)?;
    }
    Ok(())
}

/// Home of the shim packages: the project-local compiler installation when
/// present, the project itself otherwise.
fn default_compiler_root(sys: &dyn System, project_root: &str) -> String {
    let local = paths::join(project_root, "node_modules/frida-compile");
    if sys.is_dir(&paths::from_posix(&local)) {
        local
    } else {
        project_root.to_string()
    }
}
