mod shell;

use crate::shell::{new_shell, ShellWrite};
use ansi_term::Colour::{Fixed, Green, Red, Yellow};
use clap::{Parser, Subcommand};
use gameserver_remote_client::{
    query_with_timeout, Client, Config, ErrorKind, Pool, QueryResult, RconProtocol,
};
use log::{error, info, LevelFilter};
use rpassword::read_password;
use simplelog::{ColorChoice, TermLogger, TerminalMode};
use std::fmt::{Display, Formatter};
use std::io::Write;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Log connection and protocol details.
    #[clap(short, long, global = true)]
    verbose: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run console commands on a server over RCON.
    ///
    /// Without a command, opens an interactive shell.
    Rcon {
        /// Address of the server's RCON endpoint, e.g. `127.0.0.1:27015`.
        address: String,

        /// Command to run once instead of opening a shell.
        command: Vec<String>,

        /// RCON protocol: `source` or `goldsrc`.
        #[clap(short, long, default_value = "source")]
        protocol: RconProtocol,

        /// RCON password. Prompted for when omitted.
        #[clap(long)]
        password: Option<String>,

        /// Seconds to wait for each network operation.
        #[clap(short, long, default_value_t = 5)]
        timeout: u64,

        /// Read commands line by line from stdin, even on a terminal.
        #[clap(long)]
        no_interactive: bool,
    },

    /// Query a server's name, map and players.
    Query {
        host: String,

        port: u16,

        /// Query protocol: `source` (A2S) or `minecraft`.
        #[clap(short, long, default_value = "source")]
        protocol: String,

        /// Seconds to wait for each network operation.
        #[clap(short, long, default_value_t = 5)]
        timeout: u64,

        /// Print the result as JSON.
        #[clap(long)]
        json: bool,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ! {
    let args = Args::parse();

    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let _ = TermLogger::init(
        level,
        simplelog::Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    );

    match args.command {
        Command::Rcon {
            address,
            command,
            protocol,
            password,
            timeout,
            no_interactive,
        } => {
            let config = Config::new(address.clone(), String::new(), protocol)
                .with_timeout(Duration::from_secs(timeout));
            let pool = connect(config, password).await;

            if command.is_empty() {
                run_shell(pool, Prompt { address }, no_interactive).await
            } else {
                run_once(pool, &command.join(" ")).await
            }
        }
        Command::Query {
            host,
            port,
            protocol,
            timeout,
            json,
        } => run_query(&host, port, &protocol, Duration::from_secs(timeout), json).await,
    }
}

fn prompt_password(address: &str) -> String {
    print!("{}'s password: ", address);
    let _ = std::io::stdout().flush();

    match read_password() {
        Ok(password) => password,
        Err(err) => {
            error!("Failed to read password: {}", err);
            proc_exit::Code::FAILURE.process_exit();
        }
    }
}

/// Builds a pool and checks out one connection to make sure the password is right.
///
/// A prompted password is asked for again until the server accepts it.
async fn connect(mut config: Config, password: Option<String>) -> Pool {
    let prompted = password.is_none();
    config.password = match password {
        Some(password) => password,
        None => prompt_password(&config.address),
    };

    loop {
        let pool = match Pool::new(config.clone()) {
            Ok(pool) => pool,
            Err(err) => {
                error!("{}", err);
                proc_exit::Code::FAILURE.process_exit();
            }
        };

        let result = match pool.acquire().await {
            Ok(mut client) => client.close().await,
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => return pool,
            Err(err) if matches!(err.kind(), ErrorKind::AuthenticationFailed) && prompted => {
                println!("Invalid password.");
                pool.close().await;
                config.password = prompt_password(&config.address);
            }
            Err(err) => {
                error!("Connection failed: {}", err);
                pool.close().await;
                proc_exit::Code::FAILURE.process_exit();
            }
        }
    }
}

async fn run_once(pool: Pool, command: &str) -> ! {
    let result = match pool.acquire().await {
        Ok(mut client) => {
            let output = client.execute(command).await;
            let _ = client.close().await;
            output
        }
        Err(err) => Err(err),
    };
    pool.close().await;

    match result {
        Ok(output) => {
            print!("{}", output);
            if !output.is_empty() && !output.ends_with('\n') {
                println!();
            }
            proc_exit::Code::SUCCESS.process_exit()
        }
        Err(err) => {
            error!("Command failed: {}", err);
            proc_exit::Code::FAILURE.process_exit()
        }
    }
}

struct Prompt {
    address: String,
}

impl Display for Prompt {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}> ", Fixed(10).paint(&self.address))
    }
}

async fn run_shell(pool: Pool, prompt: Prompt, disable_interactive: bool) -> ! {
    info!(
        "Connected. View builtins with `!help`. {} {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let (mut read, mut write) = new_shell(prompt.to_string(), disable_interactive);

    while let Some(line) = read.read_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(builtin) = line.strip_prefix('!') {
            match builtin {
                "help" => print_help(&mut write),
                "stat" => {
                    let stat = pool.stat();
                    write.line(format!(
                        "{} acquired, {} idle, {} of {} connections open",
                        stat.acquired, stat.idle, stat.total, stat.max_size
                    ));
                }
                "quit" | "exit" => break,
                _ => write.error_line("Unknown builtin."),
            }
            continue;
        }

        if let Err(err) = execute(&pool, line, &mut write).await {
            write.error_line(format!("An error occurred: {}", err));
        }
    }

    pool.close().await;
    proc_exit::Code::SUCCESS.process_exit()
}

async fn execute(
    pool: &Pool,
    command: &str,
    write: &mut ShellWrite,
) -> gameserver_remote_client::Result<()> {
    let mut client = pool.acquire().await?;
    let output = client.execute(command).await;
    client.close().await?;

    let output = output?;
    if !output.is_empty() {
        write.line(output.trim_end_matches('\n'));
    }
    Ok(())
}

fn print_help(write: &mut ShellWrite) {
    write.line(format!(
        "{} {}",
        Green.paint(env!("CARGO_PKG_NAME")),
        env!("CARGO_PKG_VERSION")
    ));
    write.line("");
    write.line(Yellow.paint("BUILTINS"));
    write.line("    !help                View this help listing");
    write.line("    !stat                Show connection pool usage");
    write.line("    !quit                Close all connections and exit");
    write.line(format!(
        "    {}  Run a command on the server",
        Green.paint("<COMMAND> [ARGS...]")
    ));
}

async fn run_query(host: &str, port: u16, protocol: &str, timeout: Duration, json: bool) -> ! {
    let (result, failure) = match query_with_timeout(host, port, protocol, timeout).await {
        Ok(result) => (result, None),
        Err(err) => {
            let (result, err) = err.into_parts();
            (result, Some(err))
        }
    };

    if let Some(err) = &failure {
        error!("Query of {}:{} failed: {}", host, port, err);
    }

    if json {
        match serde_json::to_string_pretty(&result) {
            Ok(text) => println!("{}", text),
            Err(err) => {
                error!("Failed to encode result: {}", err);
                proc_exit::Code::FAILURE.process_exit();
            }
        }
    } else {
        print_result(host, port, &result);
    }

    match failure {
        None => proc_exit::Code::SUCCESS.process_exit(),
        Some(_) => proc_exit::Code::FAILURE.process_exit(),
    }
}

fn print_result(host: &str, port: u16, result: &QueryResult) {
    let status = if result.online {
        Green.paint("online")
    } else {
        Red.paint("offline")
    };
    println!("{}:{} is {}", host, port, status);

    if !result.online {
        return;
    }

    println!("{}    {}", Yellow.paint("name"), result.name);
    println!("{}     {}", Yellow.paint("map"), result.map);
    println!("{} {}", Yellow.paint("players"), result.players_label());
    for player in &result.players {
        println!("    {} ({})", player.name, player.score);
    }
}
