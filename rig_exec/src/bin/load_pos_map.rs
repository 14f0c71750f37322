//! Position map loader.
//!
//! Loads a CSV of dock positions into the controller's position table. The
//! table is zeroed first so entries removed from the CSV do not survive a
//! reload.
//!
//! CSV rows are `no,x,y,z,notice` with no header line.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use color_eyre::{eyre::WrapErr, Report};
use log::info;
use serde::Deserialize;
use std::path::PathBuf;
use structopt::StructOpt;

use comms_if::{
    net::{zmq, NetParams},
    plc::{regs, PlcLink},
};
use rig_lib::plc_client::PlcClient;
use util::{
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ---------------------------------------------------------------------------
// STRUCTS
// ---------------------------------------------------------------------------

/// Load a dock position CSV into the controller's position table
#[derive(StructOpt)]
#[structopt(name = "load_pos_map")]
struct Opt {
    /// Path to the position CSV file
    #[structopt(parse(from_os_str))]
    csv_file: PathBuf,

    /// Number of entries in the controller's position table
    #[structopt(long, default_value = "100")]
    table_size: usize,
}

/// One row of the position CSV.
#[derive(Debug, Deserialize)]
struct MapRow {
    no: i32,
    x: i32,
    y: i32,
    z: i32,
    notice: i32,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

fn main() -> Result<(), Report> {
    let opt = Opt::from_args();

    let session =
        Session::new("load_pos_map", "sessions").wrap_err("Failed to create the session")?;

    logger_init(LevelFilter::Info, &session).wrap_err("Failed to initialise logging")?;

    info!("Position Map Loader\n");

    let net_params: NetParams =
        util::params::load("net.toml").wrap_err("Could not load net params")?;

    // ---- READ THE CSV ----

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(&opt.csv_file)
        .wrap_err_with(|| format!("Could not open {:?}", opt.csv_file))?;

    let rows = reader
        .deserialize()
        .collect::<Result<Vec<MapRow>, _>>()
        .wrap_err("Could not parse the position CSV")?;

    if rows.len() > opt.table_size {
        return Err(color_eyre::eyre::eyre!(
            "The CSV holds {} rows but the table only takes {}",
            rows.len(),
            opt.table_size
        ));
    }

    info!("Loaded {} position(s) from {:?}", rows.len(), opt.csv_file);

    // ---- WRITE THE TABLE ----

    let zmq_ctx = zmq::Context::new();
    let mut plc = PlcClient::new(&zmq_ctx, &net_params)
        .wrap_err("Failed to initialise the PLC bridge client")?;

    // Zero the whole table first, stale entries must not outlive a reload
    for i in 0..opt.table_size {
        write_entry(
            &mut plc,
            i,
            &MapRow {
                no: 0,
                x: 0,
                y: 0,
                z: 0,
                notice: 0,
            },
        )
        .wrap_err_with(|| format!("Could not zero table entry {}", i))?;
    }

    for (i, row) in rows.iter().enumerate() {
        write_entry(&mut plc, i, row)
            .wrap_err_with(|| format!("Could not write table entry {}", i))?;
    }

    info!("Position table written, {} entr(ies) live", rows.len());

    session.exit();

    Ok(())
}

fn write_entry(
    plc: &mut dyn PlcLink,
    index: usize,
    row: &MapRow,
) -> Result<(), comms_if::plc::PlcError> {
    plc.write_int(&format!("{}[{}].No", regs::POSITION_TABLE, index), row.no)?;
    plc.write_int(
        &format!("{}[{}].PositionX", regs::POSITION_TABLE, index),
        row.x,
    )?;
    plc.write_int(
        &format!("{}[{}].PositionY", regs::POSITION_TABLE, index),
        row.y,
    )?;
    plc.write_int(
        &format!("{}[{}].PositionZ", regs::POSITION_TABLE, index),
        row.z,
    )?;
    plc.write_int(
        &format!("{}[{}].Notice", regs::POSITION_TABLE, index),
        row.notice,
    )?;

    Ok(())
}
