//! # Seed Data Generator
//!
//! Populates the database with test establishments for development.
//!
//! ## Usage
//! ```bash
//! # Seed the default development database
//! cargo run -p fisco-db --bin seed
//!
//! # Specify database path
//! cargo run -p fisco-db --bin seed -- --db ./data/fisco.db
//! ```
//!
//! ## Generated Establishments
//! Three homologation-environment stores with valid CNPJs, spread across
//! states so endpoint routing can be exercised:
//! - São Paulo (35)
//! - Rio de Janeiro (33)
//! - Rio Grande do Sul (43)
//!
//! Certificate paths point at the repository test fixture so the full
//! emission pipeline works against a stub authority out of the box.

use chrono::Utc;
use std::env;
use tracing_subscriber::EnvFilter;

use fisco_core::{Environment, EstablishmentConfig};
use fisco_db::{Database, DbConfig};

/// Installs the log subscriber for this process.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=fisco=trace` - Show trace for fisco crates only
/// - Default: INFO level, repository debug, sqlx quiet
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,fisco=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// (id suffix, cnpj, legal name, state code, state, city, municipality code)
const ESTABLISHMENTS: &[(&str, &str, &str, i64, &str, &str, i64)] = &[
    (
        "sp",
        "12345678000195",
        "Mercado Bom Preço LTDA",
        35,
        "SP",
        "São Paulo",
        3_550_308,
    ),
    (
        "rj",
        "33009911002506",
        "Padaria Estrela do Mar LTDA",
        33,
        "RJ",
        "Rio de Janeiro",
        3_304_557,
    ),
    (
        "rs",
        "11222333000181",
        "Armazém Gaúcho LTDA",
        43,
        "RS",
        "Porto Alegre",
        4_314_902,
    ),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    // Parse command line arguments
    let args: Vec<String> = env::args().collect();

    let mut db_path = String::from("./fisco_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Fisco Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>    Database file path (default: ./fisco_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("🌱 Fisco Seed Data Generator");
    println!("============================");
    println!("Database: {}", db_path);
    println!();

    // Connect to database
    let config = DbConfig::new(&db_path);
    let db = Database::new(config).await?;

    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    // Check existing establishments
    let existing = db.establishments().list().await?;
    if !existing.is_empty() {
        println!("⚠ Database already has {} establishments", existing.len());
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    println!();
    println!("Seeding establishments...");

    let now = Utc::now();
    for (suffix, tax_id, legal_name, state_code, state, city, municipality_code) in ESTABLISHMENTS {
        let establishment = EstablishmentConfig {
            id: format!("est-{suffix}"),
            tax_id: tax_id.to_string(),
            legal_name: legal_name.to_string(),
            trade_name: None,
            state_registration: format!("{state_code}0123456789"),
            state_code: *state_code,
            municipality_code: *municipality_code,
            address_street: "Rua das Flores".to_string(),
            address_number: "100".to_string(),
            address_district: "Centro".to_string(),
            address_city: city.to_string(),
            address_state: state.to_string(),
            address_zip: "01310100".to_string(),
            environment: Environment::Homologation,
            active_series: 1,
            certificate_path: "crates/fisco-engine/testdata/merchant.pem".to_string(),
            certificate_password: "fisco-test".to_string(),
            tax_regime: 1,
            created_at: now,
            updated_at: now,
        };

        establishment.validate()?;
        db.establishments().insert(&establishment).await?;
        println!("  ✓ est-{suffix}: {legal_name} ({state})");
    }

    println!();
    println!("✓ Seed complete!");

    Ok(())
}
