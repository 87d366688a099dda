use schemaboard::core::config::Config;
use schemaboard::core::{
    CanvasController, ColumnDescriptor, ExportOptions, FileBlobStore, Project, ProjectCodec,
    ProjectRepository, ProjectStore, SchemaExporter, SqlDialect, demo_project, import_columns,
};
use std::env;
use std::fs;
use std::process;

const USAGE: &str = "\
Usage: schemaboard <command> <file> [options]

Commands:
  sweep    Drop connections that no longer resolve
  layout   Arrange tables with the layered auto-layout
  sql      Export CREATE TABLE statements
  json     Re-emit the project as pretty JSON
  import   Build a project from a JSON array of column descriptors
  demo     Write a small sample project to <file>

Options:
  -o, --output <file>    Output file (default: stdout)
  -d, --dialect <name>   SQL dialect: mysql, postgres, sqlite (default: mysql)
  -n, --name <name>      Project name for import (default: file stem)";

struct Args {
    command: String,
    input: String,
    output: Option<String>,
    dialect: SqlDialect,
    name: Option<String>,
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("{}", message);
    process::exit(1);
}

fn parse_args() -> Args {
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        fail(USAGE);
    }

    let mut parsed = Args {
        command: args[1].clone(),
        input: args[2].clone(),
        output: None,
        dialect: SqlDialect::default(),
        name: None,
    };

    let mut i = 3;
    while i < args.len() {
        let Some(value) = args.get(i + 1) else {
            fail(format!("Missing value for {}", args[i]));
        };
        match args[i].as_str() {
            "-o" | "--output" => parsed.output = Some(value.clone()),
            "-d" | "--dialect" => {
                parsed.dialect = value.parse().unwrap_or_else(|e| fail(e));
            }
            "-n" | "--name" => parsed.name = Some(value.clone()),
            other => fail(format!("Unknown option: {}\n\n{}", other, USAGE)),
        }
        i += 2;
    }
    parsed
}

fn read_project(path: &str) -> Project {
    let bytes = fs::read(path).unwrap_or_else(|e| fail(format!("Failed to read {}: {}", path, e)));
    ProjectCodec::decode(&bytes).unwrap_or_else(|e| fail(format!("Invalid project {}: {}", path, e)))
}

fn write_output(output: Option<&str>, text: &str) {
    match output {
        Some(path) => {
            if let Err(e) = fs::write(path, text) {
                fail(format!("Failed to write {}: {}", path, e));
            }
            tracing::info!("Wrote {}", path);
        }
        None => println!("{}", text),
    }
}

/// Emit the project and keep a copy in the data directory when one is configured
fn emit_project(config: &Config, output: Option<&str>, project: &Project) {
    let bytes = ProjectCodec::encode(project).unwrap_or_else(|e| fail(e));
    write_output(output, &String::from_utf8_lossy(&bytes));

    if let Some(dir) = &config.data_dir {
        let store = FileBlobStore::open(dir).unwrap_or_else(|e| fail(e));
        let mut repo = ProjectRepository::new(store);
        if let Err(e) = repo.save(project) {
            fail(format!("Failed to save project to {}: {}", dir.display(), e));
        }
        tracing::info!("Saved project {} to {}", project.id, dir.display());
    }
}

fn canvas_for(config: &Config, project: Project) -> CanvasController {
    let store = ProjectStore::with_project(config.schema_service(), project);
    CanvasController::new(store, config.layout.clone(), config.clipboard())
}

fn report(canvas: &mut CanvasController) {
    for note in canvas.take_notifications() {
        eprintln!("{}", note.message);
    }
}

fn main() {
    // Load .env file (if exists)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let config = Config::from_env();
    tracing::info!(
        "Config loaded: validation={:?}, data_dir={}",
        config.validation_level,
        config.has_data_dir()
    );

    let args = parse_args();
    let output = args.output.as_deref();

    match args.command.as_str() {
        "sweep" => {
            let mut canvas = canvas_for(&config, read_project(&args.input));
            canvas.sync();
            report(&mut canvas);
            let project = canvas.store().snapshot().unwrap_or_else(|e| fail(e));
            emit_project(&config, output, &project);
        }
        "layout" => {
            let mut canvas = canvas_for(&config, read_project(&args.input));
            canvas.sync();
            let moved = canvas.auto_layout().unwrap_or_else(|e| fail(e));
            canvas.sync();
            report(&mut canvas);
            tracing::info!("Layout moved {} tables", moved);
            let project = canvas.store().snapshot().unwrap_or_else(|e| fail(e));
            emit_project(&config, output, &project);
        }
        "sql" => {
            let project = read_project(&args.input);
            let options = ExportOptions {
                sql_dialect: args.dialect,
                ..Default::default()
            };
            write_output(output, &SchemaExporter::export_sql(&project, &options));
        }
        "json" => {
            let project = read_project(&args.input);
            let json = SchemaExporter::export_json(&project).unwrap_or_else(|e| fail(e));
            write_output(output, &json);
        }
        "import" => {
            let raw = fs::read_to_string(&args.input)
                .unwrap_or_else(|e| fail(format!("Failed to read {}: {}", args.input, e)));
            let columns: Vec<ColumnDescriptor> = serde_json::from_str(&raw)
                .unwrap_or_else(|e| fail(format!("Invalid column list {}: {}", args.input, e)));
            let name = args.name.clone().unwrap_or_else(|| {
                std::path::Path::new(&args.input)
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "imported".to_string())
            });
            let outcome = import_columns(name, &columns);
            for warning in &outcome.warnings {
                eprintln!("{}", warning);
            }
            emit_project(&config, output, &outcome.project);
        }
        "demo" => {
            let project = demo_project();
            emit_project(&config, Some(output.unwrap_or(args.input.as_str())), &project);
        }
        other => fail(format!("Unknown command: {}\n\n{}", other, USAGE)),
    }
}
