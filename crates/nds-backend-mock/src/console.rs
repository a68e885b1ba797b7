//! Line oriented operator console of the mock backend.
//!
//! One command per line; words are separated by whitespace. Failures are
//! printed and the loop continues, so a typo never stops the process.

use crate::backend::MockBackend;
use nds_core::{Component, Factory, NamedParameters, NdsError, Pv, Result, Timestamp};
use std::io::{BufRead, Write};
use std::sync::Arc;

const HELP: &str = "\
commands:
  help                              show this text
  list                              list the registered PVs
  read <pv>                         read a PV (full or external name)
  write <pv> <value>                write a PV, arrays are comma separated
  pushed <pv>                       show the last value pushed on a PV
  commands <node>                   list the commands of a node
  exec <node> <command> [params..]  run a node command
  create <driver> <device> [k=v..]  allocate a device
  destroy <device>                  destroy a device
  devices                           list the allocated devices
  quit                              leave the console";

enum Flow {
    Continue,
    Quit,
}

/// Reads commands from `input` until `quit` or end of input.
pub(crate) fn run<R: BufRead, W: Write>(
    backend: &MockBackend,
    factory: &Arc<Factory>,
    input: R,
    mut output: W,
) -> Result<()> {
    writeln!(output, "rust-nds mock console, type 'help' for the command list")?;
    for line in input.lines() {
        let line = line?;
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() || words[0].starts_with('#') {
            continue;
        }
        match execute(backend, factory, &words, &mut output) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => break,
            Err(err) => {
                tracing::debug!(line = %line, error = %err, "console command failed");
                writeln!(output, "error: {err}")?;
            }
        }
        output.flush()?;
    }
    Ok(())
}

fn execute<W: Write>(
    backend: &MockBackend,
    factory: &Arc<Factory>,
    words: &[&str],
    output: &mut W,
) -> Result<Flow> {
    match words {
        ["quit"] | ["exit"] => return Ok(Flow::Quit),
        ["help"] => writeln!(output, "{HELP}")?,
        ["list"] => {
            for name in backend.pv_names() {
                writeln!(output, "{name}")?;
            }
        }
        ["read", pv] => {
            let (timestamp, value) = find(backend, pv)?.read()?;
            writeln!(output, "{timestamp} {value}")?;
        }
        ["write", pv, value @ ..] if !value.is_empty() => {
            let pv = find(backend, pv)?;
            let value = pv.pv_base().data_type().parse_value(&value.join(" "))?;
            pv.write(Timestamp::now(), value)?;
            writeln!(output, "ok")?;
        }
        ["pushed", pv] => {
            let full_name = find(backend, pv)?.base().full_name();
            let last = backend
                .port_names()
                .into_iter()
                .filter_map(|port| backend.interface(&port))
                .find_map(|interface| interface.pushed_values(&full_name).pop());
            match last {
                Some((timestamp, value)) => writeln!(output, "{timestamp} {value}")?,
                None => writeln!(output, "nothing pushed")?,
            }
        }
        ["commands", node] => {
            for name in backend.command_names(node) {
                writeln!(output, "{name}")?;
            }
        }
        ["exec", node, command, parameters @ ..] => {
            for line in backend.execute_command(node, command, parameters)? {
                writeln!(output, "{line}")?;
            }
            writeln!(output, "ok")?;
        }
        ["create", driver, device, parameters @ ..] => {
            factory.create_device(driver, device, &parse_parameters(parameters)?)?;
            writeln!(output, "created {device}")?;
        }
        ["destroy", device] => {
            factory.destroy_device(device)?;
            writeln!(output, "destroyed {device}")?;
        }
        ["devices"] => {
            for name in factory.device_names() {
                writeln!(output, "{name}")?;
            }
        }
        _ => writeln!(output, "unknown command '{}', type 'help'", words.join(" "))?,
    }
    Ok(Flow::Continue)
}

fn find(backend: &MockBackend, name: &str) -> Result<Arc<dyn Pv>> {
    backend
        .find_pv(name)
        .ok_or_else(|| NdsError::Backend(format!("PV '{name}' not found")))
}

fn parse_parameters(words: &[&str]) -> Result<NamedParameters> {
    words
        .iter()
        .map(|word| {
            word.split_once('=')
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .ok_or_else(|| NdsError::Backend(format!("parameter '{word}' is not key=value")))
        })
        .collect()
}
