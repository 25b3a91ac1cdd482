use std::path::PathBuf;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use gpuq::Provider;
use gpuq::Providers;
use gpuq::Requirement;
use utils::version;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[arg(
        short,
        long,
        global = true,
        env = "GPUQ_VERBOSE",
        help = "Log at DEBUG level unless GPUQ_LOG or RUST_LOG say otherwise"
    )]
    pub verbose: bool,

    #[arg(
        long = "lib-hint",
        global = true,
        value_name = "DIR",
        value_hint = clap::ValueHint::DirPath,
        help = "Directory searched for vendor libraries before the defaults, can be repeated"
    )]
    pub lib_hints: Vec<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show which vendor runtimes can be loaded
    Providers,
    /// List GPUs
    List(ListArgs),
    /// Count GPUs
    Count(FilterArgs),
    /// Show utilisation, used memory and processes of CUDA devices via NVML
    Status(StatusArgs),
    /// Show build information
    Version,
}

#[derive(Args)]
pub struct FilterArgs {
    #[arg(
        long,
        help = "Include devices hidden by CUDA_VISIBLE_DEVICES / HIP_VISIBLE_DEVICES"
    )]
    pub all: bool,

    #[arg(
        long = "provider",
        value_name = "PROVIDER",
        help = "Only devices of this provider (cuda, hip), can be repeated"
    )]
    pub providers: Vec<Provider>,
}

impl FilterArgs {
    pub fn providers(&self) -> Providers {
        self.providers
            .iter()
            .fold(Providers::ANY, |set, provider| set | *provider)
    }

    pub fn visible_only(&self) -> bool {
        !self.all
    }
}

#[derive(Parser)]
pub struct ListArgs {
    #[command(flatten)]
    pub filter: FilterArgs,

    #[arg(long, help = "Print a JSON array instead of text")]
    pub json: bool,

    #[arg(
        long = "require",
        value_name = "WHAT",
        value_enum,
        help = "Fail unless something is found: any device, or devices of the given provider; `any` wins over providers"
    )]
    pub require: Vec<RequireArg>,
}

impl ListArgs {
    pub fn requirement(&self) -> Requirement {
        if self.require.is_empty() {
            return Requirement::Nothing;
        }
        if self.require.contains(&RequireArg::Any) {
            return Requirement::AnyDevice;
        }
        let providers = self
            .require
            .iter()
            .filter_map(|r| match r {
                RequireArg::Cuda => Some(Provider::Cuda),
                RequireArg::Hip => Some(Provider::Hip),
                RequireArg::Any => None,
            })
            .fold(Providers::ANY, |set, provider| set | provider);
        Requirement::Providers(providers)
    }
}

#[derive(Args)]
pub struct StatusArgs {
    #[arg(long, value_name = "INDEX", help = "Only this NVML device index")]
    pub index: Option<u32>,

    #[arg(long, help = "Print a JSON array instead of text")]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RequireArg {
    Any,
    Cuda,
    Hip,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;

    #[test]
    fn command_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn list_filters() {
        let cli = Cli::try_parse_from([
            "gpuq",
            "list",
            "--all",
            "--provider",
            "rocm",
            "--require",
            "hip",
            "--json",
        ])
        .unwrap();
        let Commands::List(args) = cli.command else {
            panic!("expected list");
        };
        assert!(!args.filter.visible_only());
        assert_eq!(args.filter.providers(), Providers::HIP);
        assert_eq!(args.requirement(), Requirement::Providers(Providers::HIP));
        assert!(args.json);
    }

    #[test]
    fn defaults_match_everything() {
        let cli = Cli::try_parse_from(["gpuq", "count"]).unwrap();
        let Commands::Count(filter) = cli.command else {
            panic!("expected count");
        };
        assert!(filter.visible_only());
        assert_eq!(filter.providers(), Providers::ANY);
    }

    #[test]
    fn any_requirement_wins() {
        let cli =
            Cli::try_parse_from(["gpuq", "list", "--require", "cuda", "--require", "any"]).unwrap();
        let Commands::List(args) = cli.command else {
            panic!("expected list");
        };
        assert_eq!(args.requirement(), Requirement::AnyDevice);
    }

    #[test]
    fn status_for_one_device() {
        let cli = Cli::try_parse_from(["gpuq", "status", "--index", "1", "--json"]).unwrap();
        let Commands::Status(args) = cli.command else {
            panic!("expected status");
        };
        assert_eq!(args.index, Some(1));
        assert!(args.json);

        let cli = Cli::try_parse_from(["gpuq", "status"]).unwrap();
        let Commands::Status(args) = cli.command else {
            panic!("expected status");
        };
        assert_eq!(args.index, None);
        assert!(!args.json);
    }

    #[test]
    fn unknown_provider_is_rejected() {
        assert!(Cli::try_parse_from(["gpuq", "count", "--provider", "metal"]).is_err());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["gpuq", "providers", "-v", "--lib-hint", "/opt/cuda/lib64"])
            .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.lib_hints, vec![PathBuf::from("/opt/cuda/lib64")]);
    }
}
