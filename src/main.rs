//! bookdesk - library book issue/return desk.

use std::sync::Arc;

use bookdesk::auth::Credentials;
use bookdesk::backup::{self, Backup};
use bookdesk::cli::{Cli, Command};
use bookdesk::config::{Config, RemoteConfig};
use bookdesk::db::{self, PostgresTransport, SqlTransport, Target};
use bookdesk::error::Result;
use bookdesk::import::{self, BatchSummary, PAGE_SIZE};
use bookdesk::library::models::{format_date, parse_date};
use bookdesk::library::{books_list_csv, filter_options, schema, BookIssueRecord, Library};
use bookdesk::logging;
use bookdesk::proxy;
use bookdesk::query::Client;
use chrono::Local;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    // A missing .env is normal outside development
    let _ = dotenvy::dotenv();

    let cli = Cli::parse_args();
    if cli.log_file {
        logging::init_file_logging();
    } else {
        logging::init_stderr_logging();
    }

    if let Err(e) = run(cli).await {
        error!("{}: {}", e.category(), e.message());
        std::process::exit(1);
    }
}

/// Picks the store: the legacy remote config when given, otherwise a
/// PostgreSQL URL from the CLI, the environment, or the config file.
fn resolve_target(cli: &Cli, config: &Config) -> Result<Target> {
    if let Some(path) = &cli.remote_config {
        return Target::from_remote(&RemoteConfig::load_from_file(path)?);
    }
    Ok(Target::Postgres(
        config.resolve_connection(cli.database_url.as_deref())?,
    ))
}

fn today() -> String {
    format_date(Local::now().date_naive())
}

fn print_summary(summary: &BatchSummary) {
    println!(
        "{}: {} of {} written, {} failed",
        summary.table, summary.written, summary.total, summary.failed
    );
    for message in &summary.errors {
        println!("  {message}");
    }
}

fn print_records(records: &[BookIssueRecord]) {
    for record in records {
        println!(
            "{}  {:<30} {:<20} {:<10} issued {} {}",
            record.id.as_deref().unwrap_or("-"),
            record.book_name,
            record.author,
            record.book_no,
            record.issue_date,
            record
                .return_date
                .as_deref()
                .map(|d| format!("returned {d}"))
                .unwrap_or_default()
        );
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config_path();
    info!("Loading config from: {}", config_path.display());
    let config = Config::load_from_file(&config_path)?;
    let target = resolve_target(&cli, &config)?;
    info!("Database: {}", target.display_string());

    if let Command::InitDb = cli.command {
        let conn = db::require_postgres(&target)?;
        let transport = PostgresTransport::connect(conn, &config.database).await?;
        schema::apply(&transport).await?;
        println!("Schema ready.");
        return transport.close().await;
    }

    if let Command::Serve(args) = &cli.command {
        db::require_postgres(&target)?;
        let mut settings = config.proxy.clone();
        if let Some(bind) = &args.bind {
            settings.bind = bind.clone();
        }
        if let Some(dir) = &args.static_dir {
            settings.static_dir = Some(dir.clone());
        }
        settings.strict |= args.strict;

        let transport = db::connect(&target, &config.database).await?;
        proxy::serve(&settings, transport.clone()).await?;
        return transport.close().await;
    }

    let transport: Arc<dyn SqlTransport> = db::connect(&target, &config.database).await?;
    let client = Client::new(transport.clone());
    let library = Library::new(client.clone());
    let batch_or_default = |n: Option<usize>| n.unwrap_or(config.import.batch_size);

    match cli.command {
        Command::Serve(_) | Command::InitDb => {}

        Command::ImportStudents { path, batch_size } => {
            let result =
                import::import_students(&client, &path, batch_or_default(batch_size)).await?;
            println!(
                "{} rows read, {} incomplete, {} duplicates removed",
                result.rows_read, result.incomplete, result.duplicates
            );
            print_summary(&result.summary);
        }

        Command::NormalizeStatus { batch_size } => {
            let report =
                import::normalize_status(&client, batch_or_default(batch_size), PAGE_SIZE).await?;
            println!(
                "updated {} students ({} failed); now In: {}, Out: {}, unset: {}",
                report.updated, report.failed, report.after.r#in, report.after.out, report.after.unset
            );
            for (course, counts) in &report.by_course {
                println!("  {course}: In {}, Out {}", counts.r#in, counts.out);
            }
        }

        Command::Migrate { source, batch_size } => {
            let source_target = Target::parse(&source)?;
            info!("Source: {}", source_target.display_string());
            let source_transport = db::connect(&source_target, &config.database).await?;
            let report = import::migrate(
                &Client::new(source_transport.clone()),
                &client,
                PAGE_SIZE,
                batch_or_default(batch_size),
            )
            .await?;
            for summary in &report.tables {
                print_summary(summary);
            }
            for table in &report.skipped {
                println!("{table}: skipped");
            }
            for count in &report.counts {
                println!("{}: {} rows in destination", count.table, count.rows);
            }
            source_transport.close().await?;
        }

        Command::Export {
            output,
            exported_by,
        } => {
            let backup = backup::export(&client, &exported_by).await?;
            backup.write_to(&output)?;
            println!(
                "Exported {} students and {} records to {}",
                backup.statistics.total_students,
                backup.statistics.total_records,
                output.display()
            );
        }

        Command::ImportBackup { input, batch_size } => {
            let backup = Backup::read_from(&input)?;
            let summary = backup::import(&client, &backup, batch_or_default(batch_size)).await?;
            print_summary(&summary.students);
            print_summary(&summary.book_issues);
        }

        Command::Stats { by_student } => {
            let stats = library.dashboard().await?;
            println!("Books issued:    {}", stats.issued);
            println!("Books returned:  {}", stats.returned);
            println!("Books pending:   {}", stats.pending);
            println!("Students (In):   {}", stats.students);
            if by_student {
                println!();
                for ledger in library.pending_ledgers().await? {
                    let student = ledger
                        .student
                        .map(|key| key.to_string())
                        .unwrap_or_default();
                    println!(
                        "{:<24} issued {:>3}  returned {:>3}  pending {:>3}",
                        student, ledger.issued, ledger.returned, ledger.pending
                    );
                }
            }
        }

        Command::Search { term, limit } => {
            let students = library.search_students(&term, limit).await?;
            if students.is_empty() {
                println!("No students found");
            }
            for s in students {
                println!(
                    "{:<12} {:<8} {:<30} {:<25} year {} {}",
                    s.reg_no,
                    s.course,
                    s.name,
                    s.father,
                    s.year,
                    s.effective_status()
                );
            }
        }

        Command::Student(args) => {
            let key = args.key();
            let student = library.find_student(&key).await?;
            let ledger = library.student_stats(&key).await?;
            println!("{} ({key}), year {}", student.name, student.year);
            println!(
                "issued {}, returned {}, pending {}",
                ledger.issued, ledger.returned, ledger.pending
            );
            print_records(&library.pending_books(&key).await?);
        }

        Command::Issue(args) => {
            let key = args.student.key();
            library.find_student(&key).await?;
            let issued = library.issue_books(&key, args.requests(&today())?).await?;
            println!("Issued {} book(s) to {key}", issued.len());
            print_records(&issued);
        }

        Command::Return { ids, date } => {
            let date = match date {
                Some(d) => parse_date("return_date", &d)?,
                None => Local::now().date_naive(),
            };
            let returned = library.return_books(&ids, date).await?;
            if returned.len() < ids.len() {
                warn!("{} of {} records were not found", ids.len() - returned.len(), ids.len());
            }
            println!("Returned {} book(s)", returned.len());
        }

        Command::EditRecord(args) => {
            let record = library.edit_record(&args.id, &args.to_edit()).await?;
            print_records(&[record]);
        }

        Command::DeleteRecord { id } => {
            library.delete_record(&id).await?;
            println!("Deleted {id}");
        }

        Command::ClearBooks { username, password } => {
            Credentials::new(username, password).verify(&config.auth)?;
            library.clear_all_books().await?;
            println!("All book records deleted. Students were kept.");
        }

        Command::BooksList {
            kind,
            year,
            course,
            csv,
        } => {
            let groups = library
                .books_list(kind, year.as_deref(), course.as_deref())
                .await?;
            if csv {
                print!("{}", books_list_csv(&groups)?);
            } else {
                println!("{} ({} students)", kind.title(), groups.len());
                let (years, courses) = filter_options(&groups);
                println!("Years: {}  Courses: {}", years.join(", "), courses.join(", "));
                for (i, group) in groups.iter().enumerate() {
                    let books: Vec<&str> =
                        group.books.iter().map(|b| b.book_name.as_str()).collect();
                    println!(
                        "{:>3}. {:<25} {:<12} year {:<3} {:<8} {}",
                        i + 1,
                        group.name,
                        group.reg_no,
                        group.year,
                        group.course,
                        books.join(", ")
                    );
                }
            }
        }
    }

    transport.close().await
}
