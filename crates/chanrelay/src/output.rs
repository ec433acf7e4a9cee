use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use serde_json::{Map, Value};

use chanrelay_frame::Envelope;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct EnvelopeOutput<'a> {
    channel: &'a str,
    cmd: &'a str,
    msg_id: Option<String>,
    reply_to: Option<String>,
    data: &'a Map<String, Value>,
    received: String,
}

pub fn print_envelope(envelope: &Envelope, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = EnvelopeOutput {
                channel: &envelope.channel,
                cmd: &envelope.cmd,
                msg_id: envelope.msg_id.map(|id| id.to_string()),
                reply_to: envelope.reply_to.map(|id| id.to_string()),
                data: &envelope.data,
                received: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CHANNEL", "CMD", "REPLY-TO", "DATA"])
                .add_row(vec![
                    envelope.channel.clone(),
                    envelope.cmd.clone(),
                    envelope
                        .reply_to
                        .map(|id| id.to_string())
                        .unwrap_or_default(),
                    data_preview(&envelope.data),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "channel={} cmd={} msg_id={} reply_to={} data={}",
                envelope.channel,
                envelope.cmd,
                envelope
                    .msg_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                envelope
                    .reply_to
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                data_preview(&envelope.data)
            );
        }
        OutputFormat::Raw => match envelope.to_json_string() {
            Ok(text) => println!("{text}"),
            Err(_) => println!("{{}}"),
        },
    }
}

fn data_preview(data: &Map<String, Value>) -> String {
    serde_json::to_string(data).unwrap_or_else(|_| "{}".to_string())
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
