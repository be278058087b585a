//! CLI command handling.
//!
//! Provides:
//! - Running an image as the invoking user (`run`, implied when omitted)
//! - Building the `su-exec` helper (`setup`)
//! - Shell completion generation (`completion`)

mod completion;

pub use completion::{generate_completions, parse_shell};

use std::path::PathBuf;

use clap::error::ErrorKind;
use clap::{ArgGroup, Args, CommandFactory, Parser, Subcommand};

use crate::bootstrap::HomeStrategy;
use crate::config::{self, DockerClientConfig, Settings};
use crate::docker::DockerBackend;
use crate::identity::HostIdentity;
use crate::logging::Verbosity;
use crate::orchestrator::{DockerInside, exit_code};
use crate::plan::{RunOptions, RunPlan, Workdir};
use crate::setup::{DEFAULT_SU_EXEC_URL, SetupOptions, run_setup};

#[derive(Parser, Debug)]
#[command(name = "din")]
#[command(about = "Run a docker container as the invoking host user")]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
#[command(group(ArgGroup::new("verbosity").args(["verbose", "quiet", "debug"])))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub run: RunArgs,

    /// Verbose logging
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Only log errors
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Trace logging, including dependencies
    #[arg(long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run an image (default if no subcommand given)
    Run(RunArgs),

    /// Build the su-exec helper into the configuration directory
    Setup(SetupArgs),

    /// Generate a shell completion script
    Completion {
        /// bash, zsh, fish, powershell or elvish
        shell: String,
    },
}

#[derive(Args, Debug, Default, Clone)]
#[command(group(ArgGroup::new("home").args(["mount_home", "home_dir", "tmp_home"])))]
#[command(group(ArgGroup::new("workdir_mode").args(["workdir", "mount_workdir"])))]
pub struct RunArgs {
    /// Name of the container
    #[arg(long)]
    pub name: Option<String>,

    /// Bind mount a volume (host[:container[:mode]])
    #[arg(short = 'v', long = "volume", value_name = "VOLUME")]
    pub volumes: Vec<String>,

    /// Mount the home directory of the user
    #[arg(short = 'H', long)]
    pub mount_home: bool,

    /// Mount a host directory as home directory
    #[arg(long, value_name = "PATH")]
    pub home_dir: Option<PathBuf>,

    /// Create an empty home directory in the container
    #[arg(long)]
    pub tmp_home: bool,

    /// Pull unavailable images automatically
    #[arg(long)]
    pub auto_pull: bool,

    /// Add a Linux capability
    #[arg(long = "cap-add", value_name = "CAP")]
    pub cap_add: Vec<String>,

    /// Drop a Linux capability
    #[arg(long = "cap-drop", value_name = "CAP")]
    pub cap_drop: Vec<String>,

    /// Add a host device (host[:container[:permissions]])
    #[arg(long = "device", value_name = "DEVICE")]
    pub devices: Vec<String>,

    /// Set an environment variable (NAME=VALUE, or NAME to pass the host value)
    #[arg(short = 'e', long = "env", value_name = "ENV")]
    pub env: Vec<String>,

    /// Publish a container port ([[ip:]hostPort:]containerPort[/protocol])
    #[arg(short = 'p', long = "port", value_name = "PORT")]
    pub ports: Vec<String>,

    /// Mount a tmpfs (path[:options])
    #[arg(long = "tmpfs", value_name = "TMPFS")]
    pub tmpfs: Vec<String>,

    /// Working directory inside the container
    #[arg(short = 'w', long, value_name = "PATH")]
    pub workdir: Option<String>,

    /// Mount a host directory at the same path and use it as working directory
    #[arg(short = 'W', long, value_name = "PATH")]
    pub mount_workdir: Option<PathBuf>,

    /// Size of /dev/shm (e.g. 64m)
    #[arg(long, value_name = "SIZE")]
    pub shm_size: Option<String>,

    /// Share the X11 socket and DISPLAY
    #[arg(long)]
    pub x11: bool,

    /// Run an init process inside the container
    #[arg(long)]
    pub init: bool,

    /// Run the bootstrap as root even if the image sets a user
    #[arg(long)]
    pub switch_root: bool,

    /// Trace the bootstrap script inside the container
    #[arg(long)]
    pub verbose_bootstrap: bool,

    /// Image to run (name[:tag])
    #[arg(value_name = "IMAGE")]
    pub image: Option<String>,

    /// Command to run, followed by its arguments
    #[arg(value_name = "CMD", trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl RunArgs {
    pub fn home_strategy(&self) -> HomeStrategy {
        if self.mount_home {
            HomeStrategy::MountHome
        } else if let Some(dir) = &self.home_dir {
            HomeStrategy::HomeDir(dir.clone())
        } else if self.tmp_home {
            HomeStrategy::Temporary
        } else {
            HomeStrategy::None
        }
    }

    pub fn workdir(&self) -> Workdir {
        match (&self.workdir, &self.mount_workdir) {
            (_, Some(dir)) => Workdir::Mount(dir.clone()),
            (Some(path), None) => Workdir::Path(path.clone()),
            (None, None) => Workdir::Image,
        }
    }

    /// Combine with `settings`; settings entries come first so arguments override them.
    pub fn into_options(self, settings: &Settings) -> RunOptions {
        let home = self.home_strategy();
        let workdir = self.workdir();
        RunOptions {
            image: self.image.unwrap_or_default(),
            command: self.command,
            name: self.name,
            volumes: settings.volumes.iter().cloned().chain(self.volumes).collect(),
            home,
            auto_pull: self.auto_pull || settings.auto_pull,
            cap_add: self.cap_add,
            cap_drop: self.cap_drop,
            devices: self.devices,
            env: settings.env.iter().cloned().chain(self.env).collect(),
            ports: self.ports,
            tmpfs: self.tmpfs,
            workdir,
            shm_size: self.shm_size,
            x11: self.x11,
            init: self.init,
            switch_root: self.switch_root,
            verbose_bootstrap: self.verbose_bootstrap,
            attach: None,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct SetupArgs {
    /// Git URL of the su-exec repository
    #[arg(long, default_value = DEFAULT_SU_EXEC_URL)]
    pub url: String,

    /// Refspec for the su-exec repository (tag/branch; default: master)
    #[arg(long)]
    pub refspec: Option<String>,

    /// Override the home directory
    #[arg(long, value_name = "DIR")]
    pub home: Option<PathBuf>,

    /// Name of the container
    #[arg(long)]
    pub name: Option<String>,

    /// Pull unavailable images automatically
    #[arg(long)]
    pub auto_pull: bool,

    /// Allow access to the host network (e.g. for a proxy on localhost)
    #[arg(long)]
    pub host_network: bool,
}

impl From<SetupArgs> for SetupOptions {
    fn from(args: SetupArgs) -> Self {
        SetupOptions {
            url: args.url,
            refspec: args.refspec,
            home: args.home,
            name: args.name,
            auto_pull: args.auto_pull,
            host_network: args.host_network,
        }
    }
}

impl Cli {
    /// Parse the process arguments, exiting with a usage error when no image is given.
    pub fn parse_args() -> Self {
        let cli = Self::parse();
        if cli.command.is_none() && cli.run.image.is_none() {
            Self::command()
                .error(
                    ErrorKind::MissingRequiredArgument,
                    "the following required argument was not provided: <IMAGE>",
                )
                .exit();
        }
        cli
    }

    pub fn verbosity(&self) -> Verbosity {
        if self.debug {
            Verbosity::Debug
        } else if self.verbose {
            Verbosity::Verbose
        } else if self.quiet {
            Verbosity::Quiet
        } else {
            Verbosity::Normal
        }
    }
}

/// Execute the parsed command and return the process exit code.
pub async fn run_command(cli: Cli) -> anyhow::Result<i32> {
    match cli.command {
        Some(Command::Run(args)) => run_container(args).await,
        None => run_container(cli.run).await,
        Some(Command::Setup(args)) => run_setup_command(args.into()).await,
        Some(Command::Completion { shell }) => {
            generate_completions(&shell, &mut std::io::stdout())?;
            Ok(0)
        }
    }
}

async fn run_container(args: RunArgs) -> anyhow::Result<i32> {
    let host_env = config::host_env();
    let config_dir = config::config_dir(&host_env);
    let settings = Settings::load(&config_dir);
    let options = args.into_options(&settings);

    let identity = HostIdentity::resolve()?;
    let plan = RunPlan::prepare(
        options,
        identity,
        host_env.clone(),
        &config::home_dir(),
        &config_dir,
    )?;

    let backend = DockerBackend::connect(&DockerClientConfig::from_env(&host_env)).await?;
    let outcome = DockerInside::new(backend).run(&plan).await?;
    Ok(exit_code(outcome.status_code))
}

async fn run_setup_command(options: SetupOptions) -> anyhow::Result<i32> {
    let host_env = config::host_env();
    let identity = HostIdentity::resolve()?;
    let backend = DockerBackend::connect(&DockerClientConfig::from_env(&host_env)).await?;
    let app = DockerInside::new(backend);
    let outcome = run_setup(&app, &options, identity.uid, identity.gid, &host_env).await?;
    Ok(exit_code(outcome.status_code))
}
