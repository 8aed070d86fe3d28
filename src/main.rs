use anyhow::Result;
use clap::Parser;
use snapcore::commands;
use snapcore::config::ConfigOptions;
use snapcore::flags::InstallFlags;
use std::path::PathBuf;

/// snapcore - package install, update and system image orchestrator
///
/// Installs packages from the catalog or from local files into versioned
/// directories, keeps them up to date and stages new system images into the
/// inactive boot slot.
///
/// Examples:
///   snapcore install hello-app            # Install from the catalog
///   snapcore install ./foo_1.0.snap --allow-unauthenticated
///   snapcore update                       # Update everything installed
#[derive(Parser, Debug)]
#[command(author, version = env!("SNAPCORE_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Apps root directory (defaults to /apps for root, ~/.snapcore/apps otherwise)
    #[arg(
        long = "root",
        short = 'r',
        env = "SNAPCORE_APPS_ROOT",
        value_name = "PATH",
        global = true
    )]
    pub apps_root: Option<PathBuf>,

    /// Directory holding one home directory per user (defaults to /home)
    #[arg(
        long = "home-root",
        env = "SNAPCORE_HOME_ROOT",
        value_name = "PATH",
        global = true
    )]
    pub home_root: Option<PathBuf>,

    /// Catalog package details endpoint
    #[arg(
        long = "details-url",
        env = "SNAPCORE_DETAILS_URL",
        value_name = "URL",
        global = true
    )]
    pub details_url: Option<String>,

    /// Catalog bulk status endpoint
    #[arg(
        long = "bulk-url",
        env = "SNAPCORE_BULK_URL",
        value_name = "URL",
        global = true
    )]
    pub bulk_url: Option<String>,

    /// System image server
    #[arg(
        long = "system-image-url",
        env = "SNAPCORE_SYSTEM_IMAGE_URL",
        value_name = "URL",
        global = true
    )]
    pub system_image_url: Option<String>,

    /// System image channel (defaults to the channel of the active slot)
    #[arg(
        long = "channel",
        env = "SNAPCORE_CHANNEL",
        value_name = "CHANNEL",
        global = true
    )]
    pub channel: Option<String>,

    /// Directory holding the a/ and b/ system image slots; enables system image updates
    #[arg(
        long = "system-image-root",
        env = "SNAPCORE_SYSTEM_IMAGE_ROOT",
        value_name = "PATH",
        global = true
    )]
    pub system_image_root: Option<PathBuf>,
}

impl Cli {
    fn options(&self) -> ConfigOptions {
        ConfigOptions {
            apps_root: self.apps_root.clone(),
            home_root: self.home_root.clone(),
            details_url: self.details_url.clone(),
            bulk_url: self.bulk_url.clone(),
            system_image_url: self.system_image_url.clone(),
            channel: self.channel.clone(),
            system_image_root: self.system_image_root.clone(),
        }
    }
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Install a package from the catalog or a local file
    Install(InstallArgs),

    /// Update all installed packages and the system image
    Update(UpdateArgs),

    /// List installed packages
    List,

    /// Show the installed versions of a package
    Versions(VersionsArgs),
}

#[derive(clap::Args, Debug)]
pub struct InstallArgs {
    /// A package file, or a catalog package as "name" or "name.origin"
    #[arg(value_name = "PACKAGE")]
    pub package: String,

    #[command(flatten)]
    pub flags: FlagArgs,
}

#[derive(clap::Args, Debug)]
pub struct UpdateArgs {
    #[command(flatten)]
    pub flags: FlagArgs,
}

#[derive(clap::Args, Debug)]
pub struct FlagArgs {
    /// Skip the SHA-512 check; needed for local files and for catalog
    /// entries without a download_sha512 digest
    #[arg(long)]
    pub allow_unauthenticated: bool,

    /// Remove superseded versions after installing
    #[arg(long)]
    pub gc: bool,

    /// Do not run activation hooks
    #[arg(long)]
    pub inhibit_hooks: bool,
}

impl FlagArgs {
    fn to_flags(&self) -> InstallFlags {
        let mut flags = InstallFlags::empty();
        flags.set(InstallFlags::ALLOW_UNAUTHENTICATED, self.allow_unauthenticated);
        flags.set(InstallFlags::DO_INSTALL_GC, self.gc);
        flags.set(InstallFlags::INHIBIT_HOOKS, self.inhibit_hooks);
        flags
    }
}

#[derive(clap::Args, Debug)]
pub struct VersionsArgs {
    /// The package as "name.origin"
    #[arg(value_name = "NAME.ORIGIN")]
    pub package: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let runtime = snapcore::runtime::RealRuntime;
    let options = cli.options();

    match cli.command {
        Commands::Install(args) => {
            commands::install(runtime, &args.package, args.flags.to_flags(), options).await?
        }
        Commands::Update(args) => commands::update(runtime, args.flags.to_flags(), options).await?,
        Commands::List => commands::list(runtime, options)?,
        Commands::Versions(args) => commands::versions(runtime, &args.package, options)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_install_parsing() {
        let cli = Cli::try_parse_from(["snapcore", "install", "hello-app.canonical"]).unwrap();
        match cli.command {
            Commands::Install(args) => {
                assert_eq!(args.package, "hello-app.canonical");
                assert_eq!(args.flags.to_flags(), InstallFlags::empty());
            }
            _ => panic!("Expected Install command"),
        }
        assert_eq!(cli.apps_root, None);
    }

    #[test]
    fn test_cli_install_flags() {
        let cli = Cli::try_parse_from([
            "snapcore",
            "install",
            "./foo.snap",
            "--allow-unauthenticated",
            "--gc",
            "--inhibit-hooks",
        ])
        .unwrap();
        match cli.command {
            Commands::Install(args) => assert_eq!(
                args.flags.to_flags(),
                InstallFlags::ALLOW_UNAUTHENTICATED
                    | InstallFlags::DO_INSTALL_GC
                    | InstallFlags::INHIBIT_HOOKS
            ),
            _ => panic!("Expected Install command"),
        }
    }

    #[test]
    fn test_cli_update_parsing() {
        let cli = Cli::try_parse_from(["snapcore", "update", "--gc"]).unwrap();
        match cli.command {
            Commands::Update(args) => assert!(args.flags.gc),
            _ => panic!("Expected Update command"),
        }
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::try_parse_from([
            "snapcore",
            "--root",
            "/tmp/apps",
            "list",
            "--system-image-root",
            "/writable/si",
            "--channel",
            "stable",
        ])
        .unwrap();
        let options = cli.options();
        assert_eq!(options.apps_root, Some(PathBuf::from("/tmp/apps")));
        assert_eq!(options.system_image_root, Some(PathBuf::from("/writable/si")));
        assert_eq!(options.channel.as_deref(), Some("stable"));
    }

    #[test]
    fn test_cli_versions_parsing() {
        let cli = Cli::try_parse_from(["snapcore", "versions", "foo.sideload"]).unwrap();
        match cli.command {
            Commands::Versions(args) => assert_eq!(args.package, "foo.sideload"),
            _ => panic!("Expected Versions command"),
        }
    }

    #[test]
    fn test_allow_unauthenticated_help_names_the_digest() {
        use clap::CommandFactory;

        let cli = Cli::command();
        for command in ["install", "update"] {
            let help = cli
                .find_subcommand(command)
                .unwrap()
                .get_arguments()
                .find(|arg| arg.get_id() == "allow_unauthenticated")
                .and_then(|arg| arg.get_help())
                .unwrap()
                .to_string();
            assert!(help.contains("download_sha512"), "{}", help);
            assert!(help.contains("local files"), "{}", help);
        }
    }

    #[test]
    fn test_cli_no_subcommand_fails() {
        let result = Cli::try_parse_from(["snapcore", "hello-app"]);
        assert!(result.is_err());
    }
}
