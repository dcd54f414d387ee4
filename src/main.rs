use std::env;

use teequery::error::TeeQueryError;
use teequery::query::ServerQuery;

#[tokio::main]
async fn main() -> Result<(), TeeQueryError> {
    env_logger::init();

    let mut args = env::args().skip(1);
    let address: String = args.next().unwrap_or_else(|| "localhost".to_owned());
    let port: u16 = args
        .next()
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(ServerQuery::DEFAULT_PORT);

    let query = ServerQuery::new(address, port, false);
    match query.request_info(None).await? {
        Some(info) => println!("{info:#?}"),
        None => println!("server sent a response that could not be decoded"),
    }

    Ok(())
}
