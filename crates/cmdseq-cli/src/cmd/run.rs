use std::path::Path;

use anyhow::bail;
use cmdseq_core::{BlockMode, RunMode, RunState, StatusEvent};
use cmdseq_engine::{DispatchGateway, EngineConfig, Sequencer};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::Cli;

pub fn run(
    cli: &Cli,
    file: &Path,
    no_block: bool,
    manual: bool,
    dispatch_timeout_ms: Option<u64>,
) -> anyhow::Result<()> {
    let dictionary = cli.dictionary()?;
    let mut config = EngineConfig::default();
    if let Some(ms) = dispatch_timeout_ms {
        config.dispatch_timeout_ms = ms;
    }
    let json = cli.json;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let gateway =
            DispatchGateway::loopback(config.channel_capacity, config.dispatch_timeout());
        let sequencer = Sequencer::new(gateway, dictionary, config);

        // Mirror every status transition to stdout while the run proceeds.
        let mut feed = sequencer.subscribe();
        let printer = tokio::spawn(async move {
            while let Some(event) = feed.recv().await {
                print_event(&event, json);
            }
        });

        let result = if manual {
            run_manual(&sequencer, file).await
        } else {
            run_auto(&sequencer, file, no_block).await
        };

        drop(sequencer);
        let _ = printer.await;
        result
    })
}

async fn run_auto(sequencer: &Sequencer, file: &Path, no_block: bool) -> anyhow::Result<()> {
    let block = if no_block {
        BlockMode::NoBlock
    } else {
        BlockMode::Block
    };
    let outcome = sequencer.run(file, block).await?;

    let terminal = if outcome.is_terminal() {
        outcome
    } else {
        // Non-blocking start was accepted; stay alive until the sequence
        // finishes on its own.
        let outcomes = sequencer.joint_wait().await;
        outcomes
            .first()
            .map(|(_, state)| *state)
            .unwrap_or(outcome)
    };

    if terminal == RunState::Error {
        bail!("sequence ended in error");
    }
    Ok(())
}

async fn run_manual(sequencer: &Sequencer, file: &Path) -> anyhow::Result<()> {
    sequencer.set_mode(RunMode::Manual);
    let mut control = sequencer.subscribe();
    sequencer.run(file, BlockMode::NoBlock).await?;
    sequencer.start().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let Some(event) = control.recv().await else {
            break;
        };
        match event.state {
            RunState::WaitingStep => {
                eprintln!("-- paused after record {}: Enter to step, Ctrl-D to cancel", event.cursor);
                if lines.next_line().await?.is_some() {
                    sequencer.step().await?;
                } else {
                    sequencer.cancel().await?;
                }
            }
            RunState::Complete | RunState::Cancelled => break,
            RunState::Error => bail!("sequence ended in error"),
            _ => {}
        }
    }
    Ok(())
}

fn print_event(event: &StatusEvent, json: bool) {
    if json {
        if let Ok(line) = serde_json::to_string(event) {
            println!("{line}");
        }
    } else {
        let error = event
            .error
            .as_deref()
            .map(|code| format!(" error={code}"))
            .unwrap_or_default();
        println!(
            "{} mode={} state={} cursor={}{}",
            event.sequence, event.mode, event.state, event.cursor, error
        );
    }
}
