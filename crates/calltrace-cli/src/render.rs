use calltrace_stack::{FrameId, FrameKind, ThreadStack};
use calltrace_types::SeqNo;

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RenderOptions {
    pub exceptions: bool,
}

/// Plain-text outline of every thread, in snapshot order.
pub(crate) fn render(stacks: &[ThreadStack], options: RenderOptions) -> String {
    let mut out = String::new();
    for stack in stacks {
        render_thread(&mut out, stack, options);
    }
    out
}

fn render_thread(out: &mut String, stack: &ThreadStack, options: RenderOptions) {
    match stack.thread_name() {
        Some(name) => out.push_str(&format!("thread {} {name:?}\n", stack.thread_id())),
        None => out.push_str(&format!("thread {}\n", stack.thread_id())),
    }
    if let Some(fault) = stack.fault() {
        out.push_str(&format!("  ! {fault}\n"));
    }

    let arena = stack.frames();
    for (id, depth) in arena.walk(FrameId::ROOT) {
        let Some(frame) = arena.get(id) else {
            continue;
        };
        let indent = "  ".repeat(depth);
        match frame.kind() {
            FrameKind::Root(_) => {}
            FrameKind::Method(f) => {
                push_call(out, &indent, &f.method.to_string(), frame.sequence());
            }
            FrameKind::MethodDetailed(f) => {
                push_call(out, &indent, &f.method.to_string(), frame.sequence());
            }
            FrameKind::UnmanagedTransition(f) => {
                out.push_str(&format!("{indent}[{}] {}\n", f.kind, f.method));
            }
        }
    }

    if options.exceptions && !stack.exceptions().is_empty() {
        out.push_str("  exceptions:\n");
        for info in stack.exceptions().iter() {
            out.push_str(&format!(
                "    #{} {}: {}\n",
                info.sequence, info.type_name, info.status
            ));
        }
    }
}

fn push_call(out: &mut String, indent: &str, method: &str, sequence: Option<SeqNo>) {
    match sequence {
        Some(seq) => out.push_str(&format!("{indent}{method} #{seq}\n")),
        None => out.push_str(&format!("{indent}{method}\n")),
    }
}
