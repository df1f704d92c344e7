//! Operator console.
//!
//! Line-oriented request/response over the node's TCP port, for poking
//! at a running node with netcat. An empty line repeats the previous
//! command.

use std::fmt::Write as _;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

use driftnet_peers::PeerRecord;
use driftnet_protocol::{PeerId, SENTINEL_SEQ_NUM};

use crate::transfer::TransferContext;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    PeerTable,
    Database,
    PeerDatabase(PeerId),
    AllPeerDatabases,
    All,
    UpdateDatabase(Vec<String>),
    Help,
    Quit,
}

fn parse(line: &str) -> Result<Command, String> {
    let line = line.trim();
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((v, r)) => (v, r.trim()),
        None => (line, ""),
    };
    match verb {
        "pt" | "peertable" => Ok(Command::PeerTable),
        "db" | "database" => Ok(Command::Database),
        "pdb" | "peerdatabase" => {
            let id: PeerId = rest
                .parse()
                .map_err(|_| format!("bad peer id {rest:?}"))?;
            Ok(Command::PeerDatabase(id))
        }
        "padb" => Ok(Command::AllPeerDatabases),
        "a" | "all" => Ok(Command::All),
        "udb" => {
            let rows = rest
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(String::from)
                .collect();
            Ok(Command::UpdateDatabase(rows))
        }
        "h" | "help" => Ok(Command::Help),
        "q" | "quit" => Ok(Command::Quit),
        other => Err(format!("unknown command {other:?}, try h")),
    }
}

const HELP: &str = "\
pt | peertable          known peers and their states
db | database           the local catalog
pdb <id>                one peer's replicated catalog
padb                    every peer's replicated catalog
a  | all                everything above
udb <r1,r2,...>         overwrite the local catalog rows
h  | help               this text
q  | quit               close the session
";

fn fmt_seq(seq: i64) -> String {
    if seq == SENTINEL_SEQ_NUM {
        "-".into()
    } else {
        seq.to_string()
    }
}

fn render_peer_table(records: &[PeerRecord]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<16} {:<21} {:<13} {:>10} {:>10}",
        "PEER", "ADDRESS", "STATE", "PENDING", "HELD"
    );
    let mut records: Vec<&PeerRecord> = records.iter().collect();
    records.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
    for rec in records {
        let _ = writeln!(
            out,
            "{:<16} {:<21} {:<13} {:>10} {:>10}",
            rec.id.as_str(),
            rec.addr.to_string(),
            rec.state.name(),
            fmt_seq(rec.pending_seq_num),
            fmt_seq(rec.replicated_seq_num()),
        );
    }
    out
}

fn render_catalog(title: &str, seq_num: i64, rows: &[String]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{title} (seq {})", fmt_seq(seq_num));
    if rows.is_empty() {
        let _ = writeln!(out, "  <empty>");
    }
    for row in rows {
        let _ = writeln!(out, "  {row}");
    }
    out
}

async fn peer_table_text(ctx: &TransferContext) -> String {
    render_peer_table(&ctx.table.records().await)
}

async fn database_text(ctx: &TransferContext) -> String {
    let (seq, rows) = ctx.catalog.snapshot().await;
    render_catalog("local catalog", seq, &rows)
}

async fn all_peer_databases_text(ctx: &TransferContext) -> String {
    let mut records = ctx.table.records().await;
    records.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
    if records.is_empty() {
        return "no peers\n".into();
    }
    let mut out = String::new();
    for rec in &records {
        match &rec.catalog {
            Some(cat) => out.push_str(&render_catalog(
                &format!("catalog of {}", rec.id),
                cat.seq_num(),
                cat.rows(),
            )),
            None => {
                let _ = writeln!(out, "no replicated catalog for {}", rec.id);
            }
        }
    }
    out
}

async fn execute(cmd: &Command, ctx: &TransferContext) -> String {
    match cmd {
        Command::PeerTable => peer_table_text(ctx).await,
        Command::Database => database_text(ctx).await,
        Command::PeerDatabase(id) => match ctx.table.get(id).await {
            Some(rec) => match &rec.catalog {
                Some(cat) => render_catalog(&format!("catalog of {id}"), cat.seq_num(), cat.rows()),
                None => format!("no replicated catalog for {id}\n"),
            },
            None => format!("unknown peer {id}\n"),
        },
        Command::AllPeerDatabases => all_peer_databases_text(ctx).await,
        Command::All => {
            let mut out = peer_table_text(ctx).await;
            out.push_str(&database_text(ctx).await);
            out.push_str(&all_peer_databases_text(ctx).await);
            out
        }
        Command::UpdateDatabase(rows) => {
            let seq = ctx.catalog.replace_rows(rows.clone()).await;
            format!("catalog overwritten, seq {seq}, {} rows\n", rows.len())
        }
        Command::Help => HELP.into(),
        Command::Quit => String::new(),
    }
}

/// Drive one console session. `first` is the line the listener already
/// consumed while dispatching the connection.
pub async fn run_session(
    first: &str,
    lines: &mut (impl AsyncBufReadExt + Unpin),
    out: &mut (impl AsyncWriteExt + Unpin),
    ctx: &TransferContext,
) -> std::io::Result<()> {
    let mut last: Option<Command> = None;
    let mut line = first.to_string();
    loop {
        let trimmed = line.trim();
        let cmd = if trimmed.is_empty() {
            match &last {
                Some(cmd) => Ok(cmd.clone()),
                None => Err("no previous command, try h".to_string()),
            }
        } else {
            parse(trimmed)
        };

        match cmd {
            Ok(Command::Quit) => return Ok(()),
            Ok(cmd) => {
                let reply = execute(&cmd, ctx).await;
                out.write_all(reply.as_bytes()).await?;
                last = Some(cmd);
            }
            Err(msg) => {
                out.write_all(format!("{msg}\n").as_bytes()).await?;
            }
        }
        out.flush().await?;

        line.clear();
        if lines.read_line(&mut line).await? == 0 {
            return Ok(()); // peer hung up
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftnet_peers::PeerTable;
    use driftnet_replication::SharedCatalog;
    use std::net::SocketAddr;

    fn id(s: &str) -> PeerId {
        s.parse().unwrap()
    }

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    fn ctx() -> TransferContext {
        TransferContext {
            table: PeerTable::new(),
            catalog: SharedCatalog::new(),
            shared_dir: "shared".into(),
        }
    }

    #[test]
    fn test_parse_aliases_and_arguments() {
        assert_eq!(parse("pt").unwrap(), Command::PeerTable);
        assert_eq!(parse("peertable").unwrap(), Command::PeerTable);
        assert_eq!(parse("  db ").unwrap(), Command::Database);
        assert_eq!(
            parse("pdb garage").unwrap(),
            Command::PeerDatabase(id("garage"))
        );
        assert_eq!(
            parse("udb a.txt, b.txt").unwrap(),
            Command::UpdateDatabase(vec!["a.txt".into(), "b.txt".into()])
        );
        assert_eq!(parse("udb").unwrap(), Command::UpdateDatabase(vec![]));
        assert_eq!(parse("q").unwrap(), Command::Quit);
        assert!(parse("pdb not!valid").is_err());
        assert!(parse("frobnicate").is_err());
    }

    #[tokio::test]
    async fn test_peer_table_rendering() {
        let c = ctx();
        c.table.update(&id("beta"), addr(1001), 7).await.unwrap();
        c.table.update(&id("alpha"), addr(1000), 3).await.unwrap();
        c.table
            .synchronize(&id("alpha"), vec!["x".into()], 3)
            .await
            .unwrap();

        let out = execute(&Command::PeerTable, &c).await;
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("PEER"));
        // Sorted by id; alpha synchronized with held seq, beta pending only
        assert!(lines[1].starts_with("alpha"));
        assert!(lines[1].contains("synchronized"));
        assert!(lines[2].starts_with("beta"));
        assert!(lines[2].contains("inconsistent"));
        assert!(lines[2].trim_end().ends_with('-'));
    }

    #[tokio::test]
    async fn test_udb_then_db() {
        let c = ctx();
        let reply = execute(
            &Command::UpdateDatabase(vec!["one".into(), "two".into()]),
            &c,
        )
        .await;
        assert!(reply.contains("2 rows"));

        let out = execute(&Command::Database, &c).await;
        assert!(out.contains("one"));
        assert!(out.contains("two"));
        assert_eq!(c.catalog.snapshot().await.1.len(), 2);
    }

    #[tokio::test]
    async fn test_session_empty_line_repeats_and_quit_ends() {
        let c = ctx();
        let input = b"\nh\n\nq\n".to_vec();
        let mut reader = std::io::Cursor::new(input);
        let mut out = Vec::new();

        // First line is "db", already consumed by the dispatcher
        run_session("db", &mut reader, &mut out, &c).await.unwrap();
        let out = String::from_utf8(out).unwrap();

        // db once, the empty line repeats it, then help twice
        assert_eq!(out.matches("local catalog").count(), 2);
        assert_eq!(out.matches("peertable").count(), 2);
    }

    #[tokio::test]
    async fn test_session_unknown_command_reports_and_continues() {
        let c = ctx();
        let input = b"db\nq\n".to_vec();
        let mut reader = std::io::Cursor::new(input);
        let mut out = Vec::new();

        run_session("frobnicate", &mut reader, &mut out, &c)
            .await
            .unwrap();
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("unknown command"));
        assert!(out.contains("local catalog"));
    }
}
