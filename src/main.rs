extern crate clap;
#[macro_use] extern crate log;
extern crate fern;
extern crate chrono;
extern crate term_grid;

pub mod assembler;

use clap::{Arg, ArgMatches, App};
use term_grid::{Grid, GridOptions, Direction, Filling, Cell};

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use assembler::isa::BISC;

fn main() {
    let args = process_arguments();
    initialize_logging(args.occurrences_of("verbose"));

    let ifile = args.value_of("INPUT").unwrap_or_default();
    debug!("Arguments:\n\tVerbosity: {}\n\tPreprocess Only: {}\n\tOutfile: {}\n\tInfile: {}",
        level(args.occurrences_of("verbose")),
        args.is_present("preprocess"),
        args.value_of("output").unwrap_or("None"),
        ifile
    );

    let ipath = Path::new(ifile);
    let source = match std::fs::read_to_string(&ipath) {
        Err(err) => {
            error!("fatal: unable to read input file `{}`: {}", ipath.display(), err);
            std::process::exit(1);
        },
        Ok(source) => source,
    };

    if args.is_present("preprocess") {
        match assembler::preprocess(&source) {
            Ok(text) => print!("{}", text),
            Err(err) => {
                error!("fatal: {}: {}", ipath.display(), err);
                std::process::exit(1);
            }
        }
        return;
    }

    let build = match assembler::build(&source) {
        Err(err) => {
            error!("fatal: {}: {}", ipath.display(), err);
            std::process::exit(1);
        },
        Ok(build) => build,
    };

    if args.is_present("print-debug") {
        print_listing(&build);
    }

    let opath: PathBuf = match args.value_of("output") {
        Some(filename) => PathBuf::from(filename),
        None => ipath.with_extension("bin"),
    };

    let mut ofile = match File::create(&opath) {
        Err(err) => {
            error!("fatal: unable to open output file `{}`: {}", opath.display(), err);
            std::process::exit(1);
        },
        Ok(file) => file,
    };

    let bytes = build.object.to_bytes();
    if let Err(err) = ofile.write_all(&bytes) {
        error!("fatal: unable to write to output file `{}`: {}", opath.display(), err);
        std::process::exit(1);
    }
    info!("wrote {} bytes to `{}`", bytes.len(), opath.display());
}

/// Prints every item with its address and encoding, then the symbol table.
fn print_listing(build: &assembler::Build) {
    let mut grid = Grid::new(GridOptions {
        filling:     Filling::Spaces(1),
        direction:   Direction::LeftToRight,
    });

    for section in &build.program {
        for item in &section.items {
            let bytes = assembler::codegen::encode_item(&BISC, item).unwrap_or_default();
            let hex: Vec<String> = bytes.iter().take(8).map(|b| format!("{:02X}", b)).collect();
            let ellipsis = if bytes.len() > 8 { " .." } else { "" };

            grid.add(Cell::from(format!("0x{:08X}:", item.address)));
            grid.add(Cell::from(format!("{}", item.node)));
            grid.add(Cell::from("=>".to_string()));
            grid.add(Cell::from(format!("{}{}", hex.join(" "), ellipsis)));
        }
    }

    println!("{}", grid.fit_into_columns(4));

    for (name, symbol) in build.symbols.iter() {
        println!("0x{:08X} {}", symbol.address, name);
    }
    println!("entry 0x{:08X}", build.object.entry);
}

fn level(verbosity: u64) -> log::LevelFilter {
    match verbosity {
        0 => log::LevelFilter::Error,
        1 => log::LevelFilter::Warn,
        2 => log::LevelFilter::Info,
        3 | _ => log::LevelFilter::Debug,
    }
}

fn process_arguments() -> ArgMatches<'static> {
    App::new(option_env!("CARGO_PKG_NAME").unwrap_or("bisc-asm"))
        .version(option_env!("CARGO_PKG_VERSION").unwrap_or("0.0.0"))
        .author(option_env!("CARGO_PKG_AUTHORS").unwrap_or(""))
        .about(option_env!("CARGO_PKG_DESCRIPTION").unwrap_or(""))
        .arg(Arg::with_name("INPUT")
            .help("Sets the input file to use")
            .required(true)
            .multiple(false)
            .index(1))
        .arg(Arg::with_name("verbose")
            .short("v")
            .multiple(true)
            .takes_value(false)
            .help("Sets the level of verbosity"))
        .arg(Arg::with_name("output")
            .short("o")
            .takes_value(true)
            .help("write the object file to this path instead of <INPUT>.bin"))
        .arg(Arg::with_name("preprocess")
            .short("e")
            .takes_value(false)
            .help("print the preprocessed source and stop"))
        .arg(Arg::with_name("print-debug")
            .short("d")
            .alias("show")
            .alias("s")
            .takes_value(false)
            .help("prints a listing of addresses, items and encodings to STDOUT"))
        .get_matches()
}

fn initialize_logging(verbosity: u64) {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(level(verbosity))
        .chain(std::io::stderr())
        .apply().ok();
}
