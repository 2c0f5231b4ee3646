use analytics_chat_stream::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), StreamError> {
    analytics_chat_stream::init_observability();
    let config = ClientConfig::from_env()?;
    let engine = StreamEngine::from_config(&config)?;

    let request = config.request(QueryBody::new("Summarize network activity today.", None));
    let mut stream = engine.start(request)?;

    while let Some(event) = stream.next_event().await {
        match event {
            SessionEvent::Status { text } => eprintln!("[{text}]"),
            SessionEvent::Chunk { text } => print!("{text}"),
            SessionEvent::KvResults { payload } => {
                eprintln!("result block: {}", payload.result_type);
            }
            SessionEvent::Done(_) => println!(),
            SessionEvent::Error { error } => eprintln!("stream error: {error}"),
            SessionEvent::Metadata(_) => {}
        }
    }

    let state = stream.wait_terminal().await;
    eprintln!("session ended: {state:?}");
    Ok(())
}
