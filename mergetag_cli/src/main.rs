use std::path::Path;
use std::process;

use clap::Parser;
use mergetag_cli::Commands;
use mergetag_cli::MergeTagCli;
use mergetag_cli::OutputFormat;
use mergetag_core::AnyEmptyResult;
use mergetag_core::EngineConfig;
use mergetag_core::MergeDataset;
use mergetag_core::MergeEngine;
use mergetag_core::MergeTagResult;
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;

static USE_COLOR: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

fn color_enabled() -> bool {
	USE_COLOR.load(std::sync::atomic::Ordering::Relaxed)
}

/// Apply ANSI color codes only when color is enabled.
macro_rules! colored {
	($text:expr,red) => {
		if color_enabled() {
			format!("{}", $text.red())
		} else {
			format!("{}", $text)
		}
	};
	($text:expr,green) => {
		if color_enabled() {
			format!("{}", $text.green())
		} else {
			format!("{}", $text)
		}
	};
	($text:expr,yellow) => {
		if color_enabled() {
			format!("{}", $text.yellow())
		} else {
			format!("{}", $text)
		}
	};
}

fn main() {
	let args = MergeTagCli::parse();

	// Respect NO_COLOR env var and --no-color flag.
	let use_color = !args.no_color && std::env::var_os("NO_COLOR").is_none();
	if !use_color {
		USE_COLOR.store(false, std::sync::atomic::Ordering::Relaxed);
	}

	init_tracing(args.verbose, use_color);

	miette::set_hook(Box::new(move |_| {
		Box::new(
			miette::MietteHandlerOpts::new()
				.color(use_color)
				.unicode(use_color)
				.build(),
		)
	}))
	.ok();

	let result = match &args.command {
		Commands::Validate {
			template,
			format,
			config,
		} => run_validate(template, *format, config.as_deref()),
		Commands::Merge {
			template,
			data,
			output,
			format,
			config,
		} => run_merge(template, data, output, *format, config.as_deref()),
	};

	if let Err(e) = result {
		match e.downcast::<mergetag_core::MergeTagError>() {
			Ok(error) => {
				let report: miette::Report = (*error).into();
				eprintln!("{report:?}");
			}
			Err(e) => {
				eprintln!("{} {e}", colored!("error:", red));
			}
		}
		process::exit(2);
	}
}

/// Logs go to stderr so stdout stays machine readable.
fn init_tracing(verbose: bool, use_color: bool) {
	let default_level = if verbose { "debug" } else { "warn" };
	let filter =
		EnvFilter::try_from_env("MERGETAG_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.with_ansi(use_color)
		.with_target(false)
		.init();
}

/// Load an explicit config file, or discover one in the current directory.
fn load_config(path: Option<&Path>) -> MergeTagResult<EngineConfig> {
	if let Some(path) = path {
		return EngineConfig::load_file(path);
	}

	let root = std::env::current_dir()?;
	let config = EngineConfig::load(&root)?;
	if config.is_some() {
		tracing::debug!(root = %root.display(), "loaded discovered config");
	}

	Ok(config.unwrap_or_default())
}

fn run_validate(template: &Path, format: OutputFormat, config: Option<&Path>) -> AnyEmptyResult {
	let engine = MergeEngine::new(load_config(config)?);
	let bytes = std::fs::read(template)?;
	let report = engine.validate(&bytes)?;

	match format {
		OutputFormat::Json => {
			println!("{}", serde_json::to_string_pretty(&report)?);
		}
		OutputFormat::Text => {
			print!("{}", report.render_text());
			println!();
			if report.is_valid() {
				println!("{}", colored!("Template is valid.", green));
			} else {
				println!(
					"{}",
					colored!(
						format!("Template has {} structural error(s).", report.errors.len()),
						red
					)
				);
			}
		}
	}

	if !report.is_valid() {
		process::exit(1);
	}

	Ok(())
}

fn run_merge(
	template: &Path,
	data: &Path,
	output: &Path,
	format: OutputFormat,
	config: Option<&Path>,
) -> AnyEmptyResult {
	let engine = MergeEngine::new(load_config(config)?);
	let bytes = std::fs::read(template)?;
	let dataset = MergeDataset::from_json_str(&std::fs::read_to_string(data)?)?;
	let outcome = engine.merge(&bytes, &dataset);

	if let Some(merged) = &outcome.output {
		std::fs::write(output, merged)?;
	}

	match format {
		OutputFormat::Json => {
			println!("{}", serde_json::to_string_pretty(&outcome)?);
		}
		OutputFormat::Text => {
			if let Some(error) = &outcome.error {
				println!(
					"{} [{}] {}",
					colored!("Merge failed:", red),
					error.kind,
					error.message
				);
			} else {
				println!(
					"{} {}",
					colored!("Merged template written to", green),
					output.display()
				);
				if outcome.unresolved_tags.is_empty() {
					println!("- Unresolved tags: none");
				} else {
					println!("- Unresolved tags: {}", outcome.unresolved_tags.join(", "));
				}
				println!("- Warnings: {}", outcome.warnings.len());
				for warning in &outcome.warnings {
					println!("  {} {warning}", colored!("-", yellow));
				}
			}
		}
	}

	if !outcome.success {
		process::exit(1);
	}

	Ok(())
}
