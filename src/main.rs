use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
mod config;
mod error;
mod events;
mod mappings;
mod services;
mod utils;

use config::{Config, LoggingConfig};
use events::{LayoutRecord, Shortcut};
use services::{
    create_platform, JsonFileStore, KeyValueStore, LayoutService, LayoutServiceHandle, LayoutStore, MemoryStore,
};

#[derive(Parser, Debug)]
#[command(name = "snap")]
#[command(about = "Сохранение и восстановление раскладок окон macOS")]
struct Args {
    /// Путь к файлу конфигурации
    #[arg(short, long, default_value = "snap.toml")]
    config: String,

    /// Режим сухого запуска: эмулируемый рабочий стол, изменения не сохраняются на диск
    #[arg(long)]
    dry_run: bool,

    /// Уровень логирования (перекрывает настройки из конфигурации)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Сохранить текущие окна как новую раскладку
    Save,
    /// Перезаписать окна раскладки, сохранив сочетание и избранное
    Replace { name: String },
    /// Восстановить раскладку
    Restore { name: String },
    /// Список раскладок в порядке меню
    List,
    /// Подробности раскладки
    Show { name: String },
    Delete { name: String },
    Rename { from: String, to: String },
    /// Назначить сочетание (например `⌘⇧1`) или снять его
    Shortcut {
        name: String,
        #[arg(required_unless_present = "clear", conflicts_with = "clear")]
        keys: Option<String>,
        #[arg(long)]
        clear: bool,
    },
    /// Переключить избранное
    Favorite { name: String },
    /// Удалить все раскладки
    ClearAll,
    /// Восстановить раскладку по сочетанию
    Trigger { keys: String },
    /// Работать в фоне: сочетания читаются построчно из stdin
    Daemon,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Загрузка конфигурации
    let config = Arc::new(Config::load(&args.config)?);

    // Инициализация системы логирования
    init_tracing(&config.logging, args.log_level.as_deref())?;

    info!("Запуск snap v{}", env!("CARGO_PKG_VERSION"));
    info!("Конфигурация загружена из: {}", args.config);

    if args.dry_run {
        warn!("Режим сухого запуска - эмулируемый рабочий стол, хранилище только в памяти");
    }

    let platform = create_platform(config.clone(), args.dry_run)?;

    // Проверка прав доступа
    utils::check_permissions(&platform).await;

    let store = Arc::new(open_store(&config, args.dry_run));
    let (handle, service_task) = LayoutService::spawn(config.clone(), platform, store);

    let result = run_command(args.command, &handle).await;

    // Сервис останавливается, когда закрыт последний хэндл
    drop(handle);
    let shutdown_timeout = tokio::time::Duration::from_secs(5);
    match tokio::time::timeout(shutdown_timeout, service_task).await {
        Ok(_) => info!("Сервис раскладок завершил работу корректно"),
        Err(_) => warn!("Таймаут при завершении сервиса раскладок"),
    }

    result
}

fn open_store(config: &Config, dry_run: bool) -> LayoutStore {
    let key = &config.storage.key;
    let file = JsonFileStore::new(&config.storage.path);
    if !dry_run {
        info!("Хранилище раскладок: {:?}", config.storage.path);
        return LayoutStore::open(Arc::new(file), key.as_str());
    }

    // Сухой запуск видит сохранённые раскладки, но пишет только в память
    let memory = match file.get(key) {
        Ok(Some(value)) => MemoryStore::with_value(key, value),
        Ok(None) => MemoryStore::new(),
        Err(e) => {
            warn!("Не удалось прочитать {:?}: {}", config.storage.path, e);
            MemoryStore::new()
        }
    };
    LayoutStore::open(Arc::new(memory), key.as_str())
}

async fn run_command(command: Command, handle: &LayoutServiceHandle) -> Result<()> {
    match command {
        Command::Save => match handle.save().await? {
            Some(record) => println!("Сохранено: {}", record),
            None => println!("Список окон недоступен, раскладка не сохранена"),
        },
        Command::Replace { name } => match handle.replace(&name).await? {
            Some(record) => println!("Перезаписано: {}", record),
            None => println!("Список окон недоступен, раскладка не изменена"),
        },
        Command::Restore { name } => {
            let report = handle.restore(&name).await?;
            print!("{}", report);
        }
        Command::List => {
            let layouts = handle.menu();
            if layouts.is_empty() {
                println!("Сохранённых раскладок нет");
            }
            for record in layouts {
                println!("{}  {}", format_saved_at(&record), record);
            }
        }
        Command::Show { name } => {
            let Some(record) = handle.get(&name) else {
                anyhow::bail!("Раскладка '{}' не найдена", name);
            };
            print_record(&record);
        }
        Command::Delete { name } => {
            if handle.delete(&name).await? {
                println!("Раскладка '{}' удалена", name);
            } else {
                println!("Раскладки '{}' нет", name);
            }
        }
        Command::Rename { from, to } => {
            handle.rename(&from, &to).await?;
            println!("'{}' → '{}'", from, to);
        }
        Command::Shortcut { name, keys, clear } => {
            let shortcut = match keys {
                Some(keys) if !clear => Some(keys.parse::<Shortcut>()?),
                _ => None,
            };
            if !handle.set_shortcut(&name, shortcut).await? {
                println!("Без изменений");
            } else {
                match shortcut {
                    Some(shortcut) => println!("'{}': {}", name, shortcut),
                    None => println!("'{}': сочетание снято", name),
                }
            }
        }
        Command::Favorite { name } => match handle.toggle_favorite(&name).await? {
            Some(true) => println!("'{}' добавлена в избранное", name),
            Some(false) => println!("'{}' убрана из избранного", name),
            None => anyhow::bail!("Раскладка '{}' не найдена", name),
        },
        Command::ClearAll => {
            handle.clear_all().await?;
            println!("Все раскладки удалены");
        }
        Command::Trigger { keys } => {
            let shortcut: Shortcut = keys.parse()?;
            match handle.restore_by_shortcut(shortcut).await? {
                Some(report) => print!("{}", report),
                None => println!("Сочетание {} не назначено", shortcut),
            }
        }
        Command::Daemon => run_daemon(handle).await?,
    }
    Ok(())
}

fn format_saved_at(record: &LayoutRecord) -> String {
    record
        .saved_at
        .with_timezone(&chrono::Local)
        .format("%Y-%m-%d %H:%M")
        .to_string()
}

fn print_record(record: &LayoutRecord) {
    println!("{}", record.name);
    println!("  сохранена: {}", format_saved_at(record));
    if let Some(shortcut) = &record.shortcut {
        println!("  сочетание: {}", shortcut);
    }
    if record.favorite {
        println!("  в избранном");
    }
    for (index, window) in record.windows.iter().enumerate() {
        println!("  {}. {}", index + 1, window);
    }
}

async fn run_daemon(handle: &LayoutServiceHandle) -> Result<()> {
    for (shortcut, name) in handle.shortcut_bindings() {
        info!("Сочетание {} → '{}'", shortcut, name);
    }

    let mut changes = handle.subscribe();
    let watcher = tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(event) => info!("Раскладки изменены: {}", event),
                Err(RecvError::Lagged(skipped)) => warn!("Пропущено {} рассылок", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    info!("Ожидание сочетаний из stdin (Ctrl+C для выхода)");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            result = signal::ctrl_c() => {
                match result {
                    Ok(()) => info!("Получен сигнал завершения (Ctrl+C)"),
                    Err(err) => error!("Ошибка при ожидании сигнала завершения: {}", err),
                }
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => trigger(handle, line.trim()).await,
                Ok(None) => {
                    info!("stdin закрыт, ожидание Ctrl+C");
                    stdin_open = false;
                }
                Err(e) => {
                    error!("Ошибка чтения stdin: {}", e);
                    stdin_open = false;
                }
            },
        }
    }

    watcher.abort();
    info!("Завершение работы...");
    Ok(())
}

async fn trigger(handle: &LayoutServiceHandle, keys: &str) {
    if keys.is_empty() {
        return;
    }
    let shortcut: Shortcut = match keys.parse() {
        Ok(shortcut) => shortcut,
        Err(e) => {
            warn!("{}", e);
            return;
        }
    };
    match handle.restore_by_shortcut(shortcut).await {
        Ok(Some(report)) => info!(
            "Раскладка '{}' восстановлена по {}: применено {}, пропущено {}",
            report.layout,
            shortcut,
            report.applied(),
            report.skipped()
        ),
        Ok(None) => info!("Сочетание {} не назначено", shortcut),
        Err(e) if e.is_recoverable() => warn!("Восстановление по {} не удалось, можно повторить: {}", shortcut, e),
        Err(e) => error!("Ошибка восстановления по {}: {}", shortcut, e),
    }
}

fn init_tracing(logging: &LoggingConfig, level_override: Option<&str>) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    // RUST_LOG перекрывает всё остальное
    let directives = logging.directives(level_override);
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(directives))?;

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "full" {
        registry.with(tracing_subscriber::fmt::layer()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().compact()).init();
    }

    Ok(())
}
