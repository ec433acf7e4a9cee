use std::time::Duration;

use serde_json::{Map, Value};

use chanrelay_frame::Envelope;
use chanrelay_transport::Client;

use crate::cmd::SendArgs;
use crate::exit::{transport_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_envelope, OutputFormat};

pub async fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let data = resolve_data(&args)?;

    let mut client = Client::connect(args.addr)
        .await
        .map_err(|err| transport_error("connect failed", err))?;

    // Replies arrive through ordinary fan-out, so subscribe first.
    if args.wait {
        client
            .subscribe(&args.channel)
            .await
            .map_err(|err| transport_error("subscribe failed", err))?;
    }

    let mut payload = Map::new();
    payload.insert("data".into(), Value::Object(data));
    let envelope = Envelope::new(&args.channel, &args.cmd, payload).with_reply_to(args.reply_to);
    let msg_id = envelope.msg_id;
    client
        .send(envelope)
        .await
        .map_err(|err| transport_error("send failed", err))?;

    if args.wait {
        let reply = tokio::time::timeout(wait_timeout, wait_for_reply(&mut client, msg_id))
            .await
            .map_err(|_| {
                CliError::new(TIMEOUT, format!("no reply within {}", args.wait_timeout))
            })??;
        print_envelope(&reply, format);
    }

    Ok(SUCCESS)
}

async fn wait_for_reply(client: &mut Client, msg_id: Option<uuid::Uuid>) -> CliResult<Envelope> {
    loop {
        let envelope = client
            .next()
            .await
            .map_err(|err| transport_error("receive failed", err))?;
        if envelope.reply_to.is_some() && envelope.reply_to == msg_id {
            return Ok(envelope);
        }
    }
}

fn resolve_data(args: &SendArgs) -> CliResult<Map<String, Value>> {
    let Some(raw) = &args.data else {
        return Ok(Map::new());
    };
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(CliError::new(USAGE, "--data must be a JSON object")),
        Err(err) => Err(CliError::new(
            USAGE,
            format!("--data is not valid JSON: {err}"),
        )),
    }
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        _ => Err(CliError::new(
            USAGE,
            format!("unsupported duration unit: {unit}"),
        )),
    }
}
