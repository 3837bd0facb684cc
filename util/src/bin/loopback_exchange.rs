//! Runs a SNEP server and client against each other over the in-memory
//! loopback link: connect, PUT a text record, GET it back.

use clap::{App, Arg};
use llcp::logging;
use llcp::loopback::Link;
use ndef::Record;
use snep::error::SnepError;
use snep::{ServerConfig, SnepClient, SnepHandler, SnepServer};
use std::sync::{Arc, Mutex};

/// Keeps whatever the last PUT delivered and serves it back to GET.
struct Clipboard {
    records: Mutex<Vec<Record>>,
}

impl SnepHandler for Clipboard {
    fn get_records(&self, _request_records: Vec<Record>) -> Result<Vec<Record>, SnepError> {
        Ok(self.records.lock().expect("Clipboard lock poisoned").clone())
    }

    fn put_records(&self, request_records: Vec<Record>) -> Result<(), SnepError> {
        *self.records.lock().expect("Clipboard lock poisoned") = request_records;
        Ok(())
    }
}

fn main() {
    let matches = App::new("SNEP loopback exchange")
        .version("1.0")
        .about("Exchanges a text record between a SNEP server and client.")
        .arg(
            Arg::with_name("SERVICE_NAME")
                .help("Service name to bind and connect")
                .required(false),
        )
        .arg(
            Arg::with_name("TEXT")
                .help("Text record content to exchange")
                .required(false),
        )
        .get_matches();

    let service_name = matches.value_of("SERVICE_NAME").unwrap_or(snep::SERVICE_NAME);
    let text = matches.value_of("TEXT").unwrap_or("hello over snep");

    let logger = logging::init();
    let link = Link::new(&logger);

    let config = ServerConfig {
        service_name: service_name.to_string(),
        ..ServerConfig::default()
    };
    let clipboard = Arc::new(Clipboard {
        records: Mutex::new(Vec::new()),
    });

    let server = SnepServer::new(&link, &config, clipboard, &logger)
        .expect("Error setting up the snep server");
    let acceptor = server.start();

    let mut client = SnepClient::new(Arc::new(link.clone()), &logger);
    if !client
        .connect_to(service_name)
        .expect("Error connecting to the snep service")
    {
        logging::error!(logger, "snep service refused the connection");
        return;
    }

    let delivered = client
        .put_records(&[Record::text("en", text)])
        .expect("Error performing put");
    logging::info!(logger, "put complete"; "delivered" => delivered);

    match client.get_records(None).expect("Error performing get") {
        Some(records) => {
            logging::info!(logger, "get complete"; "records" => records.len())
        }
        None => logging::warn!(logger, "get yielded no response"),
    }

    client.close();
    link.close();
    acceptor.join().expect("Error joining the acceptor thread");
}
