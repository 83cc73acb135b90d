//! Command-line arguments.

use clap::{Parser, Subcommand, ValueEnum};
use morphont_runtime::Strategy;
use std::path::PathBuf;

/// morphont - evidence-grounded morphology ontologies
#[derive(Parser, Debug)]
#[command(name = "morphont")]
#[command(about = "Build, repair and check pathology morphology ontologies")]
#[command(long_about = r#"
morphont searches the literature for a dataset's classes, asks a language model
for a concept ontology grounded in that evidence, and repairs the result until
it passes validation.

EXAMPLES:
  # Build an ontology for two classes
  morphont build --dataset BRACS --classes DCIS,Normal

  # Check an ontology written by hand
  morphont validate ontology.json --classes DCIS,Normal

  # Show what the cache holds for a keyword
  morphont inspect --keyword "BRACS DCIS"

CONFIGURATION:
  Settings are read from --config (YAML), then MORPHONT_DB, MORPHONT_PROVIDER,
  MORPHONT_MODEL, MORPHONT_BASE_URL, MORPHONT_MAX_ITERS, NCBI_API_KEY,
  NCBI_EMAIL and SEMANTIC_SCHOLAR_API_KEY, then command-line flags. LLM API
  keys come from ANTHROPIC_API_KEY or OPENAI_API_KEY.
"#)]
#[command(version)]
pub struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Synthesize an ontology for a dataset
    Build(BuildArgs),

    /// Validate an ontology document
    Validate(ValidateArgs),

    /// Show cached searches, results and synthesis attempts
    Inspect(InspectArgs),

    /// Print the effective configuration
    Config,
}

#[derive(clap::Args, Debug)]
pub struct BuildArgs {
    /// Dataset name
    #[arg(long)]
    pub dataset: String,

    /// Target classes, comma separated
    #[arg(long, value_delimiter = ',')]
    pub classes: Vec<String>,

    /// File with free-text class descriptions
    #[arg(long)]
    pub descriptions: Option<PathBuf>,

    /// Search keyword; repeatable. Defaults to "<dataset> <class>" per class
    #[arg(short, long = "keyword")]
    pub keywords: Vec<String>,

    /// Evidence sources, comma separated (pubmed, europe_pmc, semantic_scholar,
    /// crossref, or a fixture source)
    #[arg(long, value_delimiter = ',')]
    pub sources: Vec<String>,

    #[arg(long, value_enum)]
    pub strategy: Option<StrategyArg>,

    /// Synthesis attempts allowed
    #[arg(long)]
    pub max_iters: Option<u32>,

    /// Prompt template file
    #[arg(long)]
    pub template: Option<PathBuf>,

    /// Output directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct ValidateArgs {
    /// Ontology JSON file
    pub file: PathBuf,

    /// Classes that must be covered, comma separated
    #[arg(long, value_delimiter = ',')]
    pub classes: Vec<String>,

    /// Minimum concepts per class
    #[arg(long)]
    pub min_concepts: Option<usize>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(clap::Args, Debug)]
pub struct InspectArgs {
    /// Keyword whose searches to list
    #[arg(long, conflicts_with = "search")]
    pub keyword: Option<String>,

    /// Restrict to one source
    #[arg(long, requires = "keyword")]
    pub source: Option<String>,

    /// Search record id to show in full
    #[arg(long)]
    pub search: Option<i64>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrategyArg {
    SinglePass,
    RepairLoop,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::SinglePass => Strategy::SinglePass,
            StrategyArg::RepairLoop => Strategy::RepairLoop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_build() {
        let cli = Cli::parse_from([
            "morphont",
            "build",
            "--dataset",
            "BRACS",
            "--classes",
            "DCIS,Normal",
            "-k",
            "ductal carcinoma in situ",
            "--strategy",
            "single-pass",
        ]);
        match cli.command {
            Command::Build(args) => {
                assert_eq!(args.classes, vec!["DCIS", "Normal"]);
                assert_eq!(args.keywords, vec!["ductal carcinoma in situ"]);
                assert_eq!(args.strategy.map(Strategy::from), Some(Strategy::SinglePass));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_inspect_source_requires_keyword() {
        assert!(Cli::try_parse_from(["morphont", "inspect", "--source", "pubmed"]).is_err());
    }
}
