use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;

#[derive(Parser)]
#[command(
	author,
	version,
	about = "Validate DOCX merge templates and merge form data into them.",
	long_about = "mergetag finds `{$FIELD}` merge tags in a .docx template, even when a word \
	              processor has split them across formatting runs, and evaluates the template's \
	              `{if}` and `{listif}` blocks against a JSON dataset.\n\nQuick start:\n  \
	              mergetag validate contract.docx\n  mergetag merge contract.docx --data \
	              data.json --output merged.docx"
)]
pub struct MergeTagCli {
	#[command(subcommand)]
	pub command: Commands,

	/// Enable verbose output. Raises the log level to `debug` unless
	/// `MERGETAG_LOG` is set.
	#[arg(long, short, global = true, default_value_t = false)]
	pub verbose: bool,

	/// Disable colored output.
	#[arg(long, global = true, default_value_t = false)]
	pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
	/// Validate a template without merging it.
	///
	/// Lists every merge tag, modifier and conditional block per document
	/// part, along with recovery warnings. Exits with status 1 when the
	/// template has structural errors such as an `{if}` without `{/if}`.
	Validate {
		/// The .docx template to inspect.
		template: PathBuf,

		/// Output format for the validation report.
		#[arg(long, value_enum, default_value_t = OutputFormat::Text)]
		format: OutputFormat,

		/// Path to a `mergetag.toml`. Defaults to discovery in the current
		/// directory.
		#[arg(long)]
		config: Option<PathBuf>,
	},
	/// Merge a JSON dataset into a template.
	///
	/// The dataset is a JSON object. Strings are scalar values, arrays are
	/// list values for `{listif}` and `count()`, numbers and booleans are
	/// stringified and `null` is an empty value. Exits with status 1 when the
	/// template cannot be merged.
	Merge {
		/// The .docx template to merge into.
		template: PathBuf,

		/// JSON file holding the field values.
		#[arg(long, short)]
		data: PathBuf,

		/// Where to write the merged .docx.
		#[arg(long, short)]
		output: PathBuf,

		/// Output format for the merge outcome.
		#[arg(long, value_enum, default_value_t = OutputFormat::Text)]
		format: OutputFormat,

		/// Path to a `mergetag.toml`. Defaults to discovery in the current
		/// directory.
		#[arg(long)]
		config: Option<PathBuf>,
	},
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
	/// Human-readable text output.
	Text,
	/// JSON output for programmatic consumption.
	Json,
}
