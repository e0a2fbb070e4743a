//! Command-line argument parsing for bookdesk.

use crate::config::Config;
use crate::error::{BookdeskError, Result};
use crate::library::{BooksListKind, IssueRequest, RecordEdit, StudentKey};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Library book issue/return desk.
#[derive(Parser, Debug)]
#[command(name = "bookdesk")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// PostgreSQL connection string (overrides DATABASE_URL)
    #[arg(long, global = true, value_name = "URL")]
    pub database_url: Option<String>,

    /// Legacy JSON config pointing at a remote /api/sql endpoint
    #[arg(long, global = true, value_name = "PATH", conflicts_with = "database_url")]
    pub remote_config: Option<PathBuf>,

    /// Log to the state-directory log file instead of stderr
    #[arg(long, global = true)]
    pub log_file: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the SQL proxy and serve the dashboard's static files
    Serve(ServeArgs),

    /// Create the library tables if they do not exist
    InitDb,

    /// Import students from a CSV export
    ImportStudents {
        #[arg(value_name = "CSV")]
        path: PathBuf,

        /// Rows per upsert batch
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Set unset student in/out values to "In"
    NormalizeStatus {
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Copy all tables from another database or proxy endpoint
    Migrate {
        /// Source proxy URL (http/https) or PostgreSQL connection string
        #[arg(long, env = "SOURCE_DATABASE_URL", value_name = "URL")]
        source: String,

        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Write a JSON backup of students and records
    Export {
        #[arg(value_name = "PATH")]
        output: PathBuf,

        /// Name recorded in the backup
        #[arg(long, default_value = "admin")]
        exported_by: String,
    },

    /// Restore a JSON backup without deleting anything
    ImportBackup {
        #[arg(value_name = "PATH")]
        input: PathBuf,

        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Dashboard counts
    Stats {
        /// Also list each student who still has books out
        #[arg(long)]
        by_student: bool,
    },

    /// Find students by name, father's name, or register number
    Search {
        term: String,

        #[arg(long, default_value_t = crate::library::SEARCH_LIMIT)]
        limit: u64,
    },

    /// Show a student's ledger and pending books
    Student(StudentArgs),

    /// Issue one or more books to a student
    Issue(IssueArgs),

    /// Mark records returned
    Return {
        /// Record ids
        #[arg(required = true, value_name = "ID")]
        ids: Vec<String>,

        /// Return date (YYYY-MM-DD, default today)
        #[arg(long)]
        date: Option<String>,
    },

    /// Correct fields of an existing record
    EditRecord(EditArgs),

    /// Delete one record
    DeleteRecord {
        #[arg(value_name = "ID")]
        id: String,
    },

    /// Delete every book record (students are kept)
    ClearBooks {
        #[arg(long, env = "BOOKDESK_USER")]
        username: String,

        #[arg(long, env = "BOOKDESK_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Print a grouped books list
    BooksList {
        #[arg(value_enum)]
        kind: BooksListKind,

        #[arg(long)]
        year: Option<String>,

        #[arg(long)]
        course: Option<String>,

        /// Emit CSV instead of a table
        #[arg(long)]
        csv: bool,
    },
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to bind (overrides config)
    #[arg(long, env = "BOOKDESK_BIND")]
    pub bind: Option<String>,

    /// Directory with the dashboard's static files
    #[arg(long)]
    pub static_dir: Option<PathBuf>,

    /// Parse statements and reject anything but a single DML statement
    #[arg(long)]
    pub strict: bool,
}

#[derive(Args, Debug)]
pub struct StudentArgs {
    #[arg(long)]
    pub reg_no: String,

    #[arg(long)]
    pub course: String,
}

impl StudentArgs {
    pub fn key(&self) -> StudentKey {
        StudentKey::new(self.reg_no.trim(), self.course.trim())
    }
}

#[derive(Args, Debug)]
pub struct IssueArgs {
    #[command(flatten)]
    pub student: StudentArgs,

    /// Book as NAME|AUTHOR|BOOK_NO; repeat for several books
    #[arg(long = "book", required = true, value_name = "NAME|AUTHOR|BOOK_NO")]
    pub books: Vec<String>,

    /// Issue date (YYYY-MM-DD, default today)
    #[arg(long)]
    pub date: Option<String>,

    #[arg(long)]
    pub semester: Option<String>,

    #[arg(long)]
    pub phone_no: Option<String>,
}

impl IssueArgs {
    /// One request per `--book`, all sharing the date, semester, and phone.
    pub fn requests(&self, today: &str) -> Result<Vec<IssueRequest>> {
        let issue_date = self.date.clone().unwrap_or_else(|| today.to_string());
        self.books
            .iter()
            .map(|book| {
                let parts: Vec<&str> = book.split('|').map(str::trim).collect();
                let [name, author, book_no] = parts.as_slice() else {
                    return Err(BookdeskError::validation(format!(
                        "Invalid book '{book}'. Expected NAME|AUTHOR|BOOK_NO"
                    )));
                };
                Ok(IssueRequest {
                    book_name: name.to_string(),
                    author: author.to_string(),
                    book_no: book_no.to_string(),
                    issue_date: issue_date.clone(),
                    semester: self.semester.clone(),
                    phone_no: self.phone_no.clone(),
                })
            })
            .collect()
    }
}

#[derive(Args, Debug)]
pub struct EditArgs {
    #[arg(value_name = "ID")]
    pub id: String,

    #[arg(long)]
    pub book_name: Option<String>,

    #[arg(long)]
    pub author: Option<String>,

    #[arg(long)]
    pub book_no: Option<String>,

    #[arg(long)]
    pub issue_date: Option<String>,

    #[arg(long, conflicts_with = "reopen")]
    pub return_date: Option<String>,

    /// Clear the return date and mark the book issued again
    #[arg(long)]
    pub reopen: bool,

    #[arg(long)]
    pub semester: Option<String>,

    #[arg(long)]
    pub phone_no: Option<String>,
}

impl EditArgs {
    pub fn to_edit(&self) -> RecordEdit {
        let return_date = if self.reopen {
            Some(None)
        } else {
            self.return_date.clone().map(Some)
        };
        RecordEdit {
            book_name: self.book_name.clone(),
            author: self.author.clone(),
            book_no: self.book_no.clone(),
            issue_date: self.issue_date.clone(),
            return_date,
            semester: self.semester.clone(),
            phone_no: self.phone_no.clone(),
        }
    }
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Returns the config file path to use.
    ///
    /// Uses the --config argument if provided, otherwise the default path.
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(Config::default_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse_args(args: &[&str]) -> Cli {
        Cli::parse_from(args)
    }

    #[test]
    fn test_parse_global_options() {
        let cli = parse_args(&[
            "bookdesk",
            "--config",
            "/path/to/config.toml",
            "stats",
            "--database-url",
            "postgres://u:p@localhost/library",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("/path/to/config.toml")));
        assert_eq!(
            cli.database_url.as_deref(),
            Some("postgres://u:p@localhost/library")
        );
        assert!(matches!(cli.command, Command::Stats { by_student: false }));
    }

    #[test]
    fn test_parse_stats_by_student() {
        let cli = parse_args(&["bookdesk", "stats", "--by-student"]);
        assert!(matches!(cli.command, Command::Stats { by_student: true }));
    }

    #[test]
    fn test_remote_config_conflicts_with_database_url() {
        let result = Cli::try_parse_from([
            "bookdesk",
            "--database-url",
            "postgres://localhost/x",
            "--remote-config",
            "config.json",
            "stats",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_serve() {
        let cli = parse_args(&["bookdesk", "serve", "--bind", "0.0.0.0:8080", "--strict"]);
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.bind.as_deref(), Some("0.0.0.0:8080"));
        assert!(args.strict);
    }

    #[test]
    fn test_issue_requests() {
        let cli = parse_args(&[
            "bookdesk",
            "issue",
            "--reg-no",
            " S100 ",
            "--course",
            "CSE",
            "--book",
            "Dune | Herbert | B-1",
            "--book",
            "Emma|Austen|B-2",
            "--semester",
            "3",
        ]);
        let Command::Issue(args) = cli.command else {
            panic!("expected issue");
        };
        assert_eq!(args.student.key(), StudentKey::new("S100", "CSE"));

        let requests = args.requests("2024-03-01").unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].book_name, "Dune");
        assert_eq!(requests[0].author, "Herbert");
        assert_eq!(requests[1].issue_date, "2024-03-01");
        assert_eq!(requests[1].semester.as_deref(), Some("3"));
    }

    #[test]
    fn test_issue_rejects_malformed_book() {
        let cli = parse_args(&[
            "bookdesk", "issue", "--reg-no", "S1", "--course", "CSE", "--book", "Dune",
        ]);
        let Command::Issue(args) = cli.command else {
            panic!("expected issue");
        };
        assert!(args.requests("2024-03-01").is_err());
    }

    #[test]
    fn test_edit_reopen() {
        let cli = parse_args(&["bookdesk", "edit-record", "abc", "--reopen"]);
        let Command::EditRecord(args) = cli.command else {
            panic!("expected edit-record");
        };
        assert_eq!(args.to_edit().return_date, Some(None));

        let cli = parse_args(&["bookdesk", "edit-record", "abc", "--return-date", "2024-02-01"]);
        let Command::EditRecord(args) = cli.command else {
            panic!("expected edit-record");
        };
        assert_eq!(args.to_edit().return_date, Some(Some("2024-02-01".to_string())));
        assert_eq!(args.to_edit().book_name, None);
    }

    #[test]
    fn test_books_list_kind() {
        let cli = parse_args(&["bookdesk", "books-list", "pending", "--course", "CSE", "--csv"]);
        let Command::BooksList { kind, course, csv, .. } = cli.command else {
            panic!("expected books-list");
        };
        assert_eq!(kind, BooksListKind::Pending);
        assert_eq!(course.as_deref(), Some("CSE"));
        assert!(csv);
    }

    #[test]
    fn test_return_requires_ids() {
        assert!(Cli::try_parse_from(["bookdesk", "return"]).is_err());
    }
}
