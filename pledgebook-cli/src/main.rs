use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use pledgebook::access::validate_access_code;
use pledgebook::assistant::{reminder_text, whatsapp_link};
use pledgebook::import::csv;
use pledgebook::stats::{self, MemberSummary};
use pledgebook::{
    Config, Frequency, ImportOutcome, Member, MemberFields, MemberId, Resolution, SqliteGateway,
    Store,
};
use std::path::PathBuf;
use std::process;

/// Pledgebook CLI: track pledges and payments from the command line
#[derive(Parser)]
#[command(name = "pledgebook", version, about)]
struct Cli {
    /// Path to the config file
    #[arg(long, default_value = "pledgebook.yaml")]
    config: PathBuf,

    /// Output format
    #[arg(long, default_value = "yaml")]
    format: OutputFormat,

    /// Shared access code
    #[arg(long, env = "PLEDGEBOOK_ACCESS_CODE", hide_env_values = true)]
    access_code: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database, seed it if empty, and set the access code
    Init {
        /// New access code
        code: String,
    },

    /// List members with their balances
    List {
        /// Filter by name (case-insensitive) or phone
        #[arg(long)]
        search: Option<String>,
    },

    /// Show one member with payment history
    Show {
        /// Member ID
        id: MemberId,
    },

    /// Add a new member
    Add {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        phone: String,
        #[arg(long, default_value = "")]
        email: String,
        /// Committed amount
        #[arg(long, default_value_t = 0.0)]
        amount: f64,
        /// Monthly, Yearly or One-time
        #[arg(long, default_value = "Yearly")]
        frequency: String,
        #[arg(long, default_value = "")]
        notes: String,
    },

    /// Edit a member's details (payments are kept)
    Edit {
        /// Member ID
        id: MemberId,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        amount: Option<f64>,
        #[arg(long)]
        frequency: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },

    /// Delete a member and their payments
    Delete {
        /// Member ID
        id: MemberId,
    },

    /// Record a payment
    Pay {
        /// Member ID
        id: MemberId,
        amount: f64,
        /// Payment date, YYYY-MM-DD (default: today)
        #[arg(long)]
        date: Option<NaiveDate>,
        #[arg(long, default_value = "")]
        note: String,
    },

    /// Delete a payment
    Unpay {
        /// Member ID
        id: MemberId,
        payment_id: String,
    },

    /// Import members from a CSV file
    Import {
        file: PathBuf,
        /// How to handle rows that match an existing member: skip, update
        /// (or merge) or create
        #[arg(long, default_value = "skip")]
        resolve: Resolution,
    },

    /// Export all members as CSV
    Export {
        /// Write to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Print the CSV import template
    Template,

    /// Show fundraising totals and top pledgers
    Stats {
        #[arg(long, default_value_t = 5)]
        top: usize,
    },

    /// Print a payment reminder for a member
    Reminder {
        /// Member ID
        id: MemberId,
        #[arg(long, default_value = "our community")]
        organization: String,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("ERROR:{e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    if let Command::Template = cli.command {
        print!("{}", csv::template());
        return Ok(());
    }

    let config = Config::load(&cli.config)?;
    let gateway = SqliteGateway::open(&config.database)?;

    if let Command::Init { code } = &cli.command {
        if code.trim().is_empty() {
            return Err("Access code must not be empty".into());
        }
        gateway.set_config(&config.access_code_key, code)?;
    } else {
        let code = cli.access_code.as_deref().unwrap_or_default();
        if !validate_access_code(&gateway, &config.access_code_key, code) {
            return Err("Invalid access code".into());
        }
    }

    let store = Store::with_config(gateway, &config)?;
    let status = store.load_all();
    log::info!("Roster loaded: {status:?}");
    if let Some(notice) = store.notice() {
        log::warn!("{notice}");
    }

    match cli.command {
        Command::Init { .. } => {
            print_output(
                &serde_json::json!({
                    "ok": true,
                    "database": config.database.display().to_string(),
                    "members": store.len(),
                    "load": status,
                }),
                &cli.format,
            )?;
        }

        Command::List { search } => {
            let members = store.search(search.as_deref().unwrap_or(""));
            let rows: Vec<MemberSummary> = members.iter().map(MemberSummary::from).collect();
            print_output(&serde_json::to_value(&rows)?, &cli.format)?;
        }

        Command::Show { id } => {
            let member = store
                .member(id)
                .ok_or_else(|| format!("Member not found: {id}"))?;
            print_output(
                &serde_json::json!({
                    "member": member,
                    "total_paid": member.total_paid(),
                    "balance": member.balance(),
                    "progress": member.progress(),
                    "whatsapp": whatsapp_link(&member),
                }),
                &cli.format,
            )?;
        }

        Command::Add {
            name,
            phone,
            email,
            amount,
            frequency,
            notes,
        } => {
            let member = Member::new(
                store.next_id(),
                MemberFields {
                    name,
                    phone,
                    email,
                    committed_amount: amount,
                    frequency: Frequency::from_loose(&frequency),
                    notes,
                },
            );
            let id = member.id;
            store.save(member)?;
            print_output(&serde_json::json!({ "ok": true, "id": id }), &cli.format)?;
        }

        Command::Edit {
            id,
            name,
            phone,
            email,
            amount,
            frequency,
            notes,
        } => {
            let existing = store
                .member(id)
                .ok_or_else(|| format!("Member not found: {id}"))?;
            let current = existing.fields();
            let fields = MemberFields {
                name: name.unwrap_or(current.name),
                phone: phone.unwrap_or(current.phone),
                email: email.unwrap_or(current.email),
                committed_amount: amount.unwrap_or(current.committed_amount),
                frequency: frequency
                    .as_deref()
                    .map(Frequency::from_loose)
                    .unwrap_or(current.frequency),
                notes: notes.unwrap_or(current.notes),
            };
            store.save(existing.merged_with(&fields))?;
            print_output(&serde_json::json!({ "ok": true, "id": id }), &cli.format)?;
        }

        Command::Delete { id } => {
            if store.member(id).is_none() {
                return Err(format!("Member not found: {id}").into());
            }
            store.delete(id)?;
            print_output(&serde_json::json!({ "ok": true, "deleted": id }), &cli.format)?;
        }

        Command::Pay {
            id,
            amount,
            date,
            note,
        } => {
            let date = date.unwrap_or_else(|| chrono::Local::now().date_naive());
            let payment = store.add_payment(id, date, amount, note)?;
            print_output(
                &serde_json::json!({ "ok": true, "member": id, "payment": payment }),
                &cli.format,
            )?;
        }

        Command::Unpay { id, payment_id } => {
            store.delete_payment(id, &payment_id)?;
            print_output(
                &serde_json::json!({ "ok": true, "member": id, "deleted": payment_id }),
                &cli.format,
            )?;
        }

        Command::Import { file, resolve } => {
            let text = std::fs::read_to_string(&file)
                .map_err(|e| format!("Failed to read '{}': {e}", file.display()))?;

            let (conflicts, report) = match store.import_csv(&text)? {
                ImportOutcome::Committed(report) => (Vec::new(), report),
                ImportOutcome::NeedsResolution(mut session) => {
                    session.analysis.resolve_all(resolve);
                    let conflicts: Vec<serde_json::Value> = session
                        .analysis
                        .conflicts
                        .iter()
                        .map(|c| {
                            serde_json::json!({
                                "candidate": c.candidate.name,
                                "existing_id": c.existing.id,
                                "existing_name": c.existing.name,
                                "reason": c.reason.to_string(),
                                "resolution": c.resolution,
                            })
                        })
                        .collect();
                    (conflicts, store.commit_import(session)?)
                }
            };
            print_output(
                &serde_json::json!({ "report": report, "conflicts": conflicts }),
                &cli.format,
            )?;
        }

        Command::Export { output } => {
            let text = csv::export_members(&store.members());
            match output {
                Some(path) => {
                    std::fs::write(&path, text)?;
                    print_output(
                        &serde_json::json!({
                            "ok": true,
                            "members": store.len(),
                            "path": path.display().to_string(),
                        }),
                        &cli.format,
                    )?;
                }
                None => print!("{text}"),
            }
        }

        Command::Stats { top } => {
            let members = store.members();
            let top: Vec<MemberSummary> = stats::top_pledgers(&members, top)
                .into_iter()
                .map(MemberSummary::from)
                .collect();
            print_output(
                &serde_json::json!({ "totals": store.stats(), "top_pledgers": top }),
                &cli.format,
            )?;
        }

        Command::Reminder { id, organization } => {
            let member = store
                .member(id)
                .ok_or_else(|| format!("Member not found: {id}"))?;
            println!("{}", reminder_text(&member, &organization));
            if let Some(link) = whatsapp_link(&member) {
                println!("\n{link}");
            }
        }

        Command::Template => {}
    }

    Ok(())
}

fn print_output(
    value: &serde_json::Value,
    format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
    }
    Ok(())
}
