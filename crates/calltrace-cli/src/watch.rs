//! Look-then-discard loop: every window the collected trees are printed and a
//! new window starts. Calls still open at the boundary carry over, together
//! with method metadata and thread names.

use calltrace_stack::Session;
use std::future::Future;
use std::io::{self, Write};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, info, warn};

use crate::render::{RenderOptions, render};
use crate::replay::apply_line;
use crate::{AnyResult, Config};

pub(crate) fn run(cfg: &Config, window: Duration) -> AnyResult<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("failed to start runtime: {e}"))?;
    runtime.block_on(async {
        let reader: Box<dyn AsyncRead + Unpin> = match &cfg.input {
            Some(path) => Box::new(
                tokio::fs::File::open(path)
                    .await
                    .map_err(|e| format!("failed to open {}: {e}", path.display()))?,
            ),
            None => Box::new(tokio::io::stdin()),
        };
        let session = Session::new(cfg.session);
        let mut out = io::stdout();
        watch_loop(&session, reader, &mut out, window, cfg.render, interrupted()).await
    })
}

async fn interrupted() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(%err, "cannot listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    info!("interrupted");
}

/// Pumps `reader` into `session` until EOF or `shutdown`, printing one window
/// to `out` per tick and a final one on exit.
pub(crate) async fn watch_loop<R, W>(
    session: &Session,
    reader: R,
    out: &mut W,
    window: Duration,
    options: RenderOptions,
    shutdown: impl Future<Output = ()>,
) -> AnyResult<()>
where
    R: AsyncRead + Unpin,
    W: Write,
{
    let mut lines = BufReader::new(reader).lines();
    let mut ticker = tokio::time::interval(window);
    // the first tick completes immediately
    ticker.tick().await;
    tokio::pin!(shutdown);

    let mut line_no = 0;
    let mut windows = 0u64;
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = line.map_err(|e| format!("line {}: failed to read: {e}", line_no + 1))?;
                let Some(line) = line else {
                    debug!(lines = line_no, "input closed");
                    break;
                };
                line_no += 1;
                if let Err(err) = apply_line(session, line_no, &line) {
                    write_window(out, session, options, windows + 1)?;
                    return Err(err);
                }
            }
            _ = ticker.tick() => {
                windows += 1;
                write_window(out, session, options, windows)?;
                session.next_window();
            }
            _ = &mut shutdown => break,
        }
    }

    windows += 1;
    write_window(out, session, options, windows)
}

fn write_window(
    out: &mut impl Write,
    session: &Session,
    options: RenderOptions,
    window: u64,
) -> AnyResult<()> {
    let snapshot = session.snapshot();
    let text = render(&snapshot, options);
    write!(out, "== window {window} ({} threads)\n{text}", snapshot.len())
        .and_then(|()| out.flush())
        .map_err(|e| format!("failed to write output: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use calltrace_types::{FunctionId, ThreadId};
    use tokio::io::AsyncWriteExt;

    const SETUP: &str = r#"{"method_info":{"function_id":16,"module_path":"/app/App.dll","type_name":"App.Program","method_name":"Main"}}
{"method_info":{"function_id":32,"module_path":"/app/App.dll","type_name":"App.Loader","method_name":"Load"}}
{"thread_name":{"thread_id":1,"name":"main"}}
{"call_enter":{"sequence":1,"thread_id":1,"function_id":16,"status":0}}
{"call_enter":{"sequence":2,"thread_id":1,"function_id":32,"status":0}}
"#;

    const LATER: &str = r#"{"call_leave":{"sequence":3,"thread_id":1,"function_id":32,"status":0}}
{"call_leave":{"sequence":4,"thread_id":1,"function_id":16,"status":0}}
{"call_enter":{"sequence":5,"thread_id":1,"function_id":32,"status":0}}
{"call_leave":{"sequence":6,"thread_id":1,"function_id":32,"status":0}}
"#;

    const WINDOW: Duration = Duration::from_millis(100);

    #[tokio::test(start_paused = true)]
    async fn open_calls_survive_window_boundaries() {
        let (reader, mut writer) = tokio::io::duplex(4096);
        let feeder = tokio::spawn(async move {
            writer.write_all(SETUP.as_bytes()).await.unwrap();
            // two ticks pass with both calls open
            tokio::time::sleep(Duration::from_millis(250)).await;
            writer.write_all(LATER.as_bytes()).await.unwrap();
        });

        let session = Session::default();
        let mut out = Vec::new();
        watch_loop(
            &session,
            reader,
            &mut out,
            WINDOW,
            RenderOptions::default(),
            std::future::pending(),
        )
        .await
        .unwrap();
        feeder.await.unwrap();

        insta::assert_snapshot!(String::from_utf8(out).unwrap(), @r#"
== window 1 (1 threads)
thread 1 "main"
  App.Program.Main #1
    App.Loader.Load #2
== window 2 (1 threads)
thread 1 "main"
  App.Program.Main #1
    App.Loader.Load #2
== window 3 (1 threads)
thread 1 "main"
  App.Program.Main #1
    App.Loader.Load #2
  App.Loader.Load #5
"#);

        assert_eq!(session.methods().len(), 2);
        assert!(!session.methods().get(FunctionId(32)).unwrap().is_placeholder());
        assert_eq!(session.thread_name(ThreadId(1)).as_deref(), Some("main"));
        let stack = session.thread(ThreadId(1)).unwrap();
        let stack = stack.lock();
        assert_eq!(stack.current(), stack.root());
        assert!(!stack.is_faulted());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_prints_a_final_window() {
        let (reader, mut writer) = tokio::io::duplex(4096);
        writer.write_all(SETUP.as_bytes()).await.unwrap();

        let session = Session::default();
        let mut out = Vec::new();
        watch_loop(
            &session,
            reader,
            &mut out,
            WINDOW,
            RenderOptions::default(),
            tokio::time::sleep(Duration::from_millis(150)),
        )
        .await
        .unwrap();
        // the input is still open
        drop(writer);

        let out = String::from_utf8(out).unwrap();
        let headers: Vec<_> = out.lines().filter(|l| l.starts_with("==")).collect();
        assert_eq!(headers, ["== window 1 (1 threads)", "== window 2 (1 threads)"]);
        assert!(out.ends_with("    App.Loader.Load #2\n"), "{out}");
    }

    #[tokio::test(start_paused = true)]
    async fn bad_line_prints_then_fails() {
        let input = concat!(
            r#"{"call_enter":{"sequence":1,"thread_id":1,"function_id":16,"status":0}}"#,
            "\n",
            r#"{"call_leave":{"sequence":3,"thread_id":1,"function_id":16,"status":0}}"#,
            "\n",
        );
        let session = Session::default();
        let mut out = Vec::new();
        let err = watch_loop(
            &session,
            input.as_bytes(),
            &mut out,
            WINDOW,
            RenderOptions::default(),
            std::future::pending(),
        )
        .await
        .unwrap_err();

        assert_eq!(err, "line 2: thread 1: sequence gap, expected 2 but got 3");
        let out = String::from_utf8(out).unwrap();
        assert!(out.starts_with("== window 1 (1 threads)\nthread 1\n  ! "), "{out}");
    }
}
