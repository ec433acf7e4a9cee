use chanrelay_transport::{Client, TransportError};

use crate::cmd::ListenArgs;
use crate::exit::{transport_error, CliResult, SUCCESS};
use crate::output::{print_envelope, OutputFormat};

pub async fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let mut client = Client::connect(args.addr)
        .await
        .map_err(|err| transport_error("connect failed", err))?;

    if args.monitor {
        client
            .monitor(true)
            .await
            .map_err(|err| transport_error("monitor failed", err))?;
    }
    for channel in args.channels.iter().flatten() {
        client
            .subscribe(channel)
            .await
            .map_err(|err| transport_error("subscribe failed", err))?;
    }

    let mut printed = 0usize;
    loop {
        let envelope = match client.next().await {
            Ok(envelope) => envelope,
            // The relay going away is a normal end of stream.
            Err(TransportError::Closed) => return Ok(SUCCESS),
            Err(err) => return Err(transport_error("receive failed", err)),
        };

        print_envelope(&envelope, format);
        printed = printed.saturating_add(1);

        if let Some(count) = args.count {
            if printed >= count {
                return Ok(SUCCESS);
            }
        }
    }
}
