//! Decodes a captured response body offline and prints the frames.
//!
//! Usage: `cargo run --example decode_transcript -- capture.txt`

use analytics_chat_stream::{Frame, FrameDecoder, ResultBlockAssembler};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let path = std::env::args()
        .nth(1)
        .ok_or("usage: decode_transcript <captured-body-file>")?;
    let body = std::fs::read(&path)?;

    let mut decoder = FrameDecoder::new();
    let mut assembler = ResultBlockAssembler::new();
    // Feed in small slices to mimic network chunking.
    let mut frames = Vec::new();
    for chunk in body.chunks(7) {
        frames.extend(decoder.push_chunk(chunk));
    }
    frames.extend(decoder.finish());

    for frame in frames {
        match frame {
            Frame::Status(text) => println!("status   {text}"),
            Frame::TextDelta(text) => println!("text     {text:?}"),
            Frame::RawLine(text) => println!("raw      {text:?}"),
            Frame::ResultBlockChunk(chunk) => assembler.push(&chunk),
            Frame::ResultBlockEnd => match assembler.finish() {
                Ok(payload) => println!("result   {}", serde_json::to_string(&payload)?),
                Err(err) => println!("dropped  {err}"),
            },
            Frame::Done => println!("done"),
        }
    }
    Ok(())
}
