//! `statica probe` command

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::cli::ProbeArgs;
use statica::toolchain::{supported_distros, SystemProbe, ToolchainFacts};
use statica::util::{Config, ShellRunner};

#[derive(Serialize)]
struct ProbeOutput {
    os: String,
    arch: String,
    cc: String,
    #[serde(flatten)]
    facts: ToolchainFacts,
    libs: BTreeMap<String, Vec<PathBuf>>,
    headers: BTreeMap<String, Vec<PathBuf>>,
    supported_distros: Vec<&'static str>,
}

pub fn execute(args: ProbeArgs, config: &Config) -> Result<()> {
    let probe = SystemProbe::new(&args.root, ShellRunner);
    let cc = args
        .cc
        .or_else(|| config.toolchain.cc.clone())
        .unwrap_or_else(|| "cc".to_string());
    let target_arch = args
        .target_arch
        .or_else(|| config.toolchain.target_arch.clone());

    let lib_names: Vec<&str> = args.find_lib.iter().map(String::as_str).collect();
    let header_names: Vec<&str> = args.find_header.iter().map(String::as_str).collect();

    let output = ProbeOutput {
        os: probe.os().as_str().to_string(),
        arch: probe.arch().to_string(),
        facts: ToolchainFacts::detect(&probe, &cc, target_arch.as_deref()),
        cc,
        libs: probe.find_static_libs(&lib_names).into_iter().collect(),
        headers: probe.find_headers(&header_names).into_iter().collect(),
        supported_distros: supported_distros().to_vec(),
    };

    if args.json {
        let json = serde_json::to_string_pretty(&output).context("failed to serialize probe output")?;
        println!("{}", json);
        return Ok(());
    }

    print_human(&output);
    Ok(())
}

fn print_human(output: &ProbeOutput) {
    let facts = &output.facts;
    println!("Host:");
    println!("  OS:      {}", output.os);
    println!("  Arch:    {}", output.arch);
    match facts.distro {
        Some(ref release) => println!("  Distro:  {} {}", release.dist, release.ver),
        None => println!("  Distro:  unknown"),
    }
    println!("  libc:    {}", if facts.is_musl { "musl" } else { "glibc or other" });
    println!("  CPUs:    {}", facts.cpu_count);
    println!();

    println!("Compiler:");
    println!("  CC:      {} ({})", output.cc, facts.compiler_type);
    if let Some(ref prefix) = facts.cross_prefix {
        println!("  Prefix:  {}", prefix);
    }

    print_matches("Static libraries:", &output.libs);
    print_matches("Headers:", &output.headers);
}

fn print_matches(title: &str, found: &BTreeMap<String, Vec<PathBuf>>) {
    if found.is_empty() {
        return;
    }
    println!();
    println!("{}", title);
    for (name, paths) in found {
        if paths.is_empty() {
            println!("  {:<16} not found", name);
        }
        for path in paths {
            println!("  {:<16} {}", name, path.display());
        }
    }
}
