use clap::Parser;
use mendmerge::cli::{AppContext, Cli, CliError, Commands};
use mendmerge::core::git::GitError;
use mendmerge::core::review::ReviewError;
use mendmerge::llm::ModelError;

/// Exit code for an error that did not come from a command's own classification.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    if let Some(cli) = err.downcast_ref::<CliError>() {
        return cli.exit_code();
    }
    if err.downcast_ref::<GitError>().is_some() || err.downcast_ref::<ReviewError>().is_some() {
        return 4;
    }
    if err.downcast_ref::<ModelError>().is_some() {
        return 5;
    }
    5
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help and version go to stdout and are not failures
            let code = if e.use_stderr() { 3 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    mendmerge::infra::logging::init(cli.verbose, cli.no_color);

    // Build a context once, pass everywhere
    let ctx = AppContext {
        quiet: cli.quiet,
        no_color: cli.no_color,
        dry_run: cli.dry_run,
    };

    let result = mendmerge::load_config(cli.config.as_deref())
        .map_err(|e| anyhow::Error::from(CliError::InvalidInput(format!("{e:#}"))))
        .and_then(|cfg| match cli.command {
            Commands::Extract(args) => mendmerge::extract_run(args, &cfg, &ctx),
            Commands::Resolve(args) => mendmerge::resolve_run(args, &cfg, &ctx),
            Commands::Apply(args) => mendmerge::apply_run(args, &cfg, &ctx),
            Commands::Check(args) => mendmerge::check_run(args, &cfg, &ctx),
            Commands::Review(args) => mendmerge::review_run(args, &cfg, &ctx),
            Commands::Init(args) => mendmerge::infra::config::init(args, &ctx),
            Commands::Completions(args) => mendmerge::completion::run(args),
        });

    if let Err(err) = result {
        let code = exit_code_for(&err);
        // Unresolved files were already reported by the command itself
        if code != 2 || ctx.quiet {
            eprintln!("Error: {err:#}");
        } else {
            eprintln!("{err}");
        }
        std::process::exit(code);
    }
}
