//! qianfan-chat: 千帆对话补全命令行工具
//!
//! Usage:
//!   qianfan-chat [OPTIONS] <PROMPT>...     Send one prompt and print the reply
//!   qianfan-chat models                    List models with a known endpoint

use anyhow::{bail, Context};
use futures::StreamExt;
use qianfan_chat::{ChatCompletion, CompletionRequest, Message, Messages, Reply};
use std::io::{Read, Write};

struct Options {
    model: Option<String>,
    endpoint: Option<String>,
    system: Option<String>,
    temperature: Option<f64>,
    stream: bool,
    auto_concat: bool,
    prompt: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("help" | "--help" | "-h") => {
            print_usage();
            Ok(())
        }
        Some("version" | "--version" | "-V") => {
            println!("qianfan-chat {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some("models") => {
            for model in qianfan_chat::models::supported_models() {
                println!("{model}");
            }
            Ok(())
        }
        _ => run(parse_args(&args)?).await,
    }
}

fn print_usage() {
    println!(
        r#"qianfan-chat: 千帆对话补全命令行工具

USAGE:
    qianfan-chat [OPTIONS] <PROMPT>...
    qianfan-chat models

OPTIONS:
    --model <name>          Model name (default: ERNIE-Bot-turbo)
    --endpoint <name>       Custom endpoint, overrides --model
    --system <text>         System message sent before the prompt
    --temperature <value>   Sampling temperature
    --stream                Print the reply as it arrives
    --auto-concat           Continue truncated replies until complete

The prompt is read from stdin when none is given.

ENVIRONMENT:
    QIANFAN_ACCESS_TOKEN    Access token for the chat API
    QIANFAN_BASE_URL        API base URL
    RUST_LOG                Log filter (e.g. qianfan_chat=debug)"#
    );
}

fn parse_args(args: &[String]) -> anyhow::Result<Options> {
    let mut opts = Options {
        model: None,
        endpoint: None,
        system: None,
        temperature: None,
        stream: false,
        auto_concat: false,
        prompt: Vec::new(),
    };

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let mut value = |flag: &str| {
            iter.next()
                .cloned()
                .with_context(|| format!("{flag} requires a value"))
        };
        match arg.as_str() {
            "--model" => opts.model = Some(value("--model")?),
            "--endpoint" => opts.endpoint = Some(value("--endpoint")?),
            "--system" => opts.system = Some(value("--system")?),
            "--temperature" => {
                let raw = value("--temperature")?;
                let t: f64 = raw
                    .parse()
                    .with_context(|| format!("invalid temperature: {raw}"))?;
                opts.temperature = Some(t);
            }
            "--stream" => opts.stream = true,
            "--auto-concat" => opts.auto_concat = true,
            flag if flag.starts_with("--") => bail!("unknown option: {flag}"),
            word => opts.prompt.push(word.to_string()),
        }
    }
    Ok(opts)
}

async fn run(opts: Options) -> anyhow::Result<()> {
    let prompt = if opts.prompt.is_empty() {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf.trim().to_string()
    } else {
        opts.prompt.join(" ")
    };
    if prompt.is_empty() {
        print_usage();
        bail!("no prompt given");
    }

    let mut messages = Messages::new();
    if let Some(system) = opts.system {
        messages.push(Message::system(system));
    }
    messages.push(Message::user(prompt));

    let mut request = CompletionRequest::new(messages).auto_concat_truncate(opts.auto_concat);
    if let Some(model) = opts.model {
        request = request.model(model);
    }
    if let Some(endpoint) = opts.endpoint {
        request = request.endpoint(endpoint);
    }
    if let Some(t) = opts.temperature {
        request = request.temperature(t);
    }
    if opts.stream {
        request = request.stream();
    }

    let client = ChatCompletion::from_env()?;
    match client.complete(request).await? {
        Reply::Single(response) => println!("{}", response.result),
        Reply::Stream(mut stream) => {
            let mut stdout = std::io::stdout();
            while let Some(item) = stream.next().await {
                let response = item?;
                write!(stdout, "{}", response.result)?;
                stdout.flush()?;
            }
            writeln!(stdout)?;
        }
    }
    Ok(())
}
