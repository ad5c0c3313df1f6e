use calltrace_stack::Session;
use calltrace_types::TraceEvent;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use tracing::info;

use crate::render::render;
use crate::{AnyResult, Config};

/// Decodes one log line. Blank lines and `#` comments yield `None`.
pub(crate) fn decode_line(line: &str) -> Result<Option<TraceEvent>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    facet_json::from_str(line)
        .map(Some)
        .map_err(|e| format!("malformed event: {e}"))
}

/// Feeds one line into the session; errors name the 1-based line number.
pub(crate) fn apply_line(session: &Session, line_no: usize, line: &str) -> AnyResult<bool> {
    let Some(event) = decode_line(line).map_err(|e| format!("line {line_no}: {e}"))? else {
        return Ok(false);
    };
    session
        .on_event(&event)
        .map_err(|e| format!("line {line_no}: {e}"))?;
    Ok(true)
}

/// Replays every line, stopping at the first failure. Returns the number of
/// events applied.
pub(crate) fn replay(session: &Session, reader: impl BufRead) -> AnyResult<usize> {
    let mut events = 0;
    for (index, line) in reader.lines().enumerate() {
        let line_no = index + 1;
        let line = line.map_err(|e| format!("line {line_no}: failed to read: {e}"))?;
        if apply_line(session, line_no, &line)? {
            events += 1;
        }
    }
    Ok(events)
}

pub(crate) fn run(cfg: &Config) -> AnyResult<()> {
    let session = Session::new(cfg.session);
    let result = match &cfg.input {
        Some(path) => {
            let file = File::open(path)
                .map_err(|e| format!("failed to open {}: {e}", path.display()))?;
            replay(&session, BufReader::new(file))
        }
        None => replay(&session, io::stdin().lock()),
    };

    // whatever was built before a failure is still worth showing
    let text = render(&session.snapshot(), cfg.render);
    io::stdout()
        .write_all(text.as_bytes())
        .map_err(|e| format!("failed to write output: {e}"))?;

    let events = result?;
    info!(
        events,
        threads = session.thread_count(),
        methods = session.methods().len(),
        "replay finished"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use calltrace_types::ThreadId;

    const LOG: &str = r#"
# one call
{"method_info":{"function_id":1,"module_path":"/app/App.dll","type_name":"App.Program","method_name":"Main"}}
{"call_enter":{"sequence":1,"thread_id":4,"function_id":1,"status":0}}

{"call_leave":{"sequence":2,"thread_id":4,"function_id":1,"status":0}}
"#;

    #[test]
    fn skips_blank_and_comment_lines() {
        assert_eq!(decode_line("   "), Ok(None));
        assert_eq!(decode_line("# note"), Ok(None));
        assert!(decode_line("{not json").is_err());
    }

    #[test]
    fn replays_a_log() {
        let session = Session::default();
        let events = replay(&session, LOG.as_bytes()).unwrap();
        assert_eq!(events, 3);

        let stack = session.thread(ThreadId(4)).unwrap();
        let stack = stack.lock();
        assert_eq!(stack.current(), stack.root());
        assert_eq!(stack.frames().len(), 2);
    }

    #[test]
    fn errors_name_the_line() {
        let session = Session::default();
        let log = concat!(
            r#"{"call_enter":{"sequence":1,"thread_id":4,"function_id":1,"status":0}}"#,
            "\n",
            r#"{"call_leave":{"sequence":3,"thread_id":4,"function_id":1,"status":0}}"#,
            "\n",
        );
        let err = replay(&session, log.as_bytes()).unwrap_err();
        assert_eq!(err, "line 2: thread 4: sequence gap, expected 2 but got 3");

        let err = replay(&Session::default(), "\n{oops}\n".as_bytes()).unwrap_err();
        assert!(err.starts_with("line 2: malformed event"), "{err}");
    }
}
