use colored::Colorize;
use commands::command_argument_builder;
use vantage::handlers::{
    handle_collapse, handle_expand, handle_init, handle_refresh, handle_show, handle_status,
    handle_top, handle_treemap, init_logging, load_config, print_banner,
};

mod commands;

#[tokio::main]
async fn main() {
    let cmd = command_argument_builder();
    let chosen_command = cmd.get_matches();
    let quiet = chosen_command.get_flag("quiet");
    let verbose = chosen_command.get_flag("verbose");

    init_logging(verbose, quiet);

    // Show banner unless --quiet flag is set
    if !quiet {
        print_banner();
    }

    let Some((name, sub_matches)) = chosen_command.subcommand() else {
        // No subcommand provided, just show the banner
        return;
    };

    let result = if name == "init" {
        handle_init(sub_matches)
    } else {
        let config_path = chosen_command
            .get_one::<String>("config")
            .map(String::as_str)
            .unwrap_or(vantage_core::config::DEFAULT_CONFIG_PATH);

        match load_config(config_path) {
            Ok(config) => match name {
                "status" => handle_status(&config).await,
                "refresh" => handle_refresh(&config).await,
                "top" => handle_top(&config).await,
                "expand" => handle_expand(sub_matches, &config).await,
                "collapse" => handle_collapse(sub_matches, &config).await,
                "show" => handle_show(sub_matches, &config).await,
                "treemap" => handle_treemap(sub_matches, &config).await,
                _ => unreachable!("clap should ensure we don't get here"),
            },
            Err(e) => Err(e),
        }
    };

    if let Err(e) = result {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}

pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);
