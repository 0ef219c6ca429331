use crate::CLAP_STYLING;
use clap::{ArgGroup, arg, command};
use std::path::PathBuf;
use vantage_core::config::DEFAULT_CONFIG_PATH;

pub(crate) fn command_argument_builder() -> clap::Command {
    clap::Command::new("vantage")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("vantage")
        .styles(CLAP_STYLING)
        .arg(
            arg!(-q --"quiet" "Suppress banner and non-essential output")
                .required(false)
                .global(true)
                .conflicts_with("verbose"),
        )
        .arg(
            arg!(-v --"verbose" "Log debug output to stderr")
                .required(false)
                .global(true),
        )
        .arg(
            arg!(-c --"config" <PATH>)
                .required(false)
                .global(true)
                .help("Path to the vantage configuration file")
                .default_value(DEFAULT_CONFIG_PATH),
        )
        .subcommand_required(false)
        .subcommand(
            command!("init")
                .about("Writes a default configuration file and creates the cache directory")
                .arg(
                    arg!([PATH])
                        .required(false)
                        .help("Where to write the configuration file")
                        .default_value(DEFAULT_CONFIG_PATH),
                )
                .arg(
                    arg!(-f --"force")
                        .help("Overwrite an existing configuration file without asking")
                        .required(false),
                ),
        )
        .subcommand(command!("status").about("Shows the state of the cached network snapshot"))
        .subcommand(
            command!("refresh")
                .about("Discards the cache and re-fetches the top-level organizations"),
        )
        .subcommand(
            command!("top").about("Fetches the top-level organizations into the cache"),
        )
        .subcommand(
            command!("expand")
                .about(
                    "Expands an organization, subnet or IP node one level and merges the \
                result into the cache.",
                )
                .arg(
                    arg!(-i --"id" <NODE_ID>)
                        .required(true)
                        .help("Store identity of the node to expand"),
                )
                .arg(
                    arg!(-t --"type" <NODE_TYPE>)
                        .required(true)
                        .help("Node type: Organization, Subnet or IP"),
                )
                .arg(
                    arg!(--"cidr-base" <PREFIX>)
                        .required(false)
                        .help("Only include subnets whose range starts with this prefix"),
                )
                .arg(
                    arg!(--"exclude" <CIDR>)
                        .required(false)
                        .help("Leave out the subnet with exactly this range"),
                )
                .arg(
                    arg!(--"timeout" <SECONDS>)
                        .required(false)
                        .help("Give up on the store after this many seconds")
                        .value_parser(clap::value_parser!(u64)),
                ),
        )
        .subcommand(
            command!("collapse")
                .about("Removes nodes and edges from the cache")
                .arg(
                    arg!(--"id" <NODE_ID>)
                        .required(false)
                        .help("Node to remove, together with its edges")
                        .action(clap::ArgAction::Append),
                )
                .arg(
                    arg!(--"edge" <SOURCE_TARGET>)
                        .required(false)
                        .help("Edge to remove, written as source:target")
                        .action(clap::ArgAction::Append),
                ),
        )
        .subcommand(
            command!("show")
                .about("Prints every cached node and edge")
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Output format: text, json")
                        .value_parser(["text", "json"])
                        .default_value("text"),
                ),
        )
        .subcommand(
            command!("treemap")
                .about(
                    "Builds the nested subnet hierarchy of a supernet and places observed \
                subnets at their most specific range.",
                )
                .arg(
                    arg!(-s --"supernet" <CIDR>)
                        .required(false)
                        .help("Supernet to subdivide (default from configuration)"),
                )
                .arg(
                    arg!(--"subnets" <PATH>)
                        .required(false)
                        .help("JSON file mapping CIDR to a label or {label, vuln}")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    arg!(--"from-cache")
                        .required(false)
                        .help("Use the subnets currently in the cache")
                        .action(clap::ArgAction::SetTrue),
                )
                .group(
                    ArgGroup::new("source")
                        .args(["subnets", "from-cache"])
                        .required(true),
                )
                .arg(
                    arg!(--"max-prefix" <PREFIX>)
                        .required(false)
                        .help("Deepest prefix length to generate (default from configuration)")
                        .value_parser(clap::value_parser!(u8).range(0..=32)),
                )
                .arg(
                    arg!(-o --"output" <PATH>)
                        .required(false)
                        .help("Write the treemap JSON to a file (default: stdout)")
                        .value_parser(clap::value_parser!(PathBuf)),
                ),
        )
}
