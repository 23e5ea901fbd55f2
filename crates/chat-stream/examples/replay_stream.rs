use chat_stream::ObservabilityConfig;
use chat_stream::observability::init_observability;
use chat_stream::prelude::*;
use chat_stream::sink;

const RECORDED: &[&str] = &[
    "data: {\"id\":\"chatcmpl-1\",\"object\":\"chat.completion.chunk\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"}}]}\n\n",
    "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hello\"}}]}\n\ndata: {\"choices\":[{\"ind",
    "ex\":0,\"delta\":{\"content\":\", world\"}}]}\n\n",
    "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
    "data: [DONE]\n\n",
];

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), chat_stream::ConfigError> {
    init_observability(&ObservabilityConfig::from_env()?);

    let mut accumulator = sink::console().with_config(AccumulatorConfig::from_env()?)?;
    let chunks = RECORDED
        .iter()
        .map(|chunk| Ok::<_, std::convert::Infallible>(chunk.as_bytes()));
    drive(futures::stream::iter(chunks), &mut accumulator).await;

    if !accumulator.is_terminal() {
        eprintln!("stream ended without a completion sentinel");
    }
    Ok(())
}
