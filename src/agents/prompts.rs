//! Prompt texts for every reasoning role.
//!
//! All roles share the reply convention: reason first, then one final `RESPONSE:` line.

use crate::agent_engine::state::{Diagnosis, Instruction, Subtask, Task};
use crate::memory::{render_errors, ErrorRecord};
use crate::perception::types::ScreenState;

pub const PLANNING_SYSTEM: &str = "\
You are the planning component of a GUI automation agent.
You break a task into ordered subtasks and subtasks into atomic instructions for an operator
who sees the same screen. Subtasks are goals, not clicks. Never plan steps that only take
screenshots, locate elements or record coordinates: the operator gets numbered screen markers.
Prefer standard keyboard shortcuts where the target is hard to see.
Always reason step by step, then end with a single line that starts with 'RESPONSE:'.";

pub const ACTION_SYSTEM: &str = "\
You are the action component of a GUI automation agent.
You turn one instruction into primitive UI operations on the current screen. Elements are
referenced by their marker number from the element list.
Supported operations, as JSON objects with an \"op\" field:
  {\"op\": \"click\", \"element\": N}
  {\"op\": \"double_click\", \"element\": N}
  {\"op\": \"right_click\", \"element\": N}
  {\"op\": \"drag\", \"from\": N, \"to\": M}
  {\"op\": \"type_text\", \"text\": \"...\", \"element\": N}   (element optional)
  {\"op\": \"press\", \"key\": \"enter\"}
  {\"op\": \"hotkey\", \"keys\": [\"ctrl\", \"s\"]}
  {\"op\": \"scroll\", \"amount\": -5, \"element\": N}   (positive scrolls up; element optional)
  {\"op\": \"wait\", \"seconds\": 1.0}
End with 'RESPONSE:' followed by a JSON array of operations.
If the instruction cannot be carried out on this screen, end with 'RESPONSE: error: <reason>'.
If nothing needs to be done, end with 'RESPONSE: done'.";

pub const REFLECTION_SYSTEM: &str = "\
You are the reflection component of a GUI automation agent.
You judge from the screen whether instructions really achieved their goal, and when they did
not, you explain why and how to fix it. Trust what is visible; assume keyboard shortcuts worked
when their effect is not visually distinct. Mention it when the screen still looks like it is
loading. Always reason step by step, then end with 'RESPONSE:'.";

pub const ERROR_HANDLING_SYSTEM: &str = "\
You are the error specialist of a GUI automation agent. Another component could not settle on
a fix for a failure. Propose one concrete resolution strategy the planner can turn into
instructions. Reason step by step, then end with 'RESPONSE:' followed by the resolution, or
'RESPONSE: UNRESOLVABLE' if no strategy can work from the current state.";

pub fn screen_block(screen: &ScreenState) -> String {
    format!("Screen elements (marker number, type, label):\n{}", screen.description)
}

fn numbered(instructions: &[Instruction]) -> String {
    instructions
        .iter()
        .enumerate()
        .map(|(i, ins)| format!("{}. {ins}", i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

fn task_line(task: &Task) -> String {
    match &task.domain {
        Some(domain) => format!("Main task ({domain}): \"{}\"", task.description),
        None => format!("Main task: \"{}\"", task.description),
    }
}

pub fn decompose(task: &Task, screen: &ScreenState) -> String {
    format!(
        "{}\n\n{}\n\n\
Identify the active application or window first so the subtasks fit the current context.
Break the main task into the ordered subtasks needed to accomplish it. Do not add a final
subtask such as 'finish the task'; every subtask must change something.

End with one line: RESPONSE: <subtask 1>; <subtask 2>; ...",
        task_line(task),
        screen_block(screen)
    )
}

pub fn instruct(task: &Task, subtask: &Subtask, screen: &ScreenState, past_errors: &[ErrorRecord]) -> String {
    format!(
        "{}\nCurrent subtask: \"{}\"\n\n{}\n\nPrevious errors in this session:\n{}\n\n\
Write the atomic instructions that accomplish the current subtask from this screen.
Combine steps that need no new look at the screen (click a field and type into it) into one
instruction. No conditionals: you can see the screen, decide. Do not repeat approaches that
already failed. Optionally append the expected result with '->', e.g.
'Press ctrl+t -> a new empty tab is focused'.

End with one line: RESPONSE: <instruction 1>; <instruction 2>; ...",
        task_line(task),
        subtask.description,
        screen_block(screen),
        render_errors(past_errors)
    )
}

pub struct ReplanPrompt<'a> {
    pub task: &'a Task,
    pub subtask: &'a Subtask,
    pub prior_instructions: &'a [Instruction],
    pub failed_at: usize,
    pub diagnosis: &'a Diagnosis,
    pub resolution: &'a str,
    pub past_errors: &'a [ErrorRecord],
    pub screen: &'a ScreenState,
}

pub fn replan(p: &ReplanPrompt<'_>) -> String {
    let goal_unmet = p.failed_at >= p.prior_instructions.len();
    let status = if goal_unmet {
        "All instructions reported done and took effect, but the subtask goal is unmet.".to_string()
    } else if p.failed_at == 0 {
        format!("None of them took effect. Instruction {} failed.", p.failed_at + 1)
    } else {
        format!(
            "Instructions 1 to {} already took effect and will not be repeated. Instruction {} failed.",
            p.failed_at,
            p.failed_at + 1
        )
    };
    let ask = if goal_unmet {
        "Write the additional instructions that finish the subtask from the current screen. They
run after the instructions above, which stay as they are."
    } else {
        "Write the corrected instructions that finish the subtask from the current screen, starting
at the point of failure. Do not include instructions that already took effect."
    };
    format!(
        "{}\nCurrent subtask: \"{}\"\n\nPlanned instructions:\n{}\n\n{status}\n\
Diagnosed cause: {}\nResolution: {}\n\n{}\n\n\
Previous errors in this session:\n{}\n\n{ask}

End with one line: RESPONSE: <instruction>; <instruction>; ...",
        task_line(p.task),
        p.subtask.description,
        numbered(p.prior_instructions),
        p.diagnosis.cause,
        p.resolution,
        screen_block(p.screen),
        render_errors(p.past_errors)
    )
}

pub fn review(task: &Task, completed: &Subtask, remaining: &[Subtask], screen: &ScreenState, past_errors: &[ErrorRecord]) -> String {
    let remaining = if remaining.is_empty() {
        "(none)".to_string()
    } else {
        remaining
            .iter()
            .map(|s| format!("- {}", s.description))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "{}\nThe subtask \"{}\" was completed.\n\nRemaining subtasks:\n{remaining}\n\n{}\n\n\
Previous errors in this session:\n{}\n\n\
Check the screen: is the main task already accomplished (including saving or confirming when
needed)? If it is, answer DONE. Otherwise give the subtasks still needed, in order, adjusting
the remaining list to what the screen shows.

End with one line: RESPONSE: DONE  or  RESPONSE: <subtask>; <subtask>; ...",
        task_line(task),
        completed.description,
        screen_block(screen),
        render_errors(past_errors)
    )
}

pub fn action(subtask: &Subtask, instruction: &Instruction, screen: &ScreenState) -> String {
    format!(
        "Current subtask: \"{}\"\nInstruction: \"{}\"\n\n{}\n\n\
Translate the instruction into operations on this screen.",
        subtask.description,
        instruction,
        screen_block(screen)
    )
}

pub fn verify(subtask: &Subtask, instructions: &[Instruction], screen: &ScreenState) -> String {
    format!(
        "Subtask: \"{}\"\nInstructions that were carried out:\n{}\n\n{}\n\n\
Identify the elements whose state shows whether the subtask succeeded, describe their
expected state, and compare with what the screen shows now. The subtask counts as done only
if its goal is visibly achieved, not merely because no operation reported an error.

End with one line: RESPONSE: yes - <short summary>  or  RESPONSE: no - <what is wrong>",
        subtask.description,
        numbered(instructions),
        screen_block(screen)
    )
}

pub struct DiagnosePrompt<'a> {
    pub subtask: &'a Subtask,
    pub instructions: &'a [Instruction],
    pub failed_at: usize,
    /// Every instruction reported done; verification found the goal unmet.
    pub goal_unmet: bool,
    pub failure: &'a str,
    pub screen: &'a ScreenState,
    pub past_errors: &'a [ErrorRecord],
}

pub fn diagnose(p: &DiagnosePrompt<'_>) -> String {
    let what = if p.goal_unmet {
        format!("All instructions reported done, but the subtask goal is unmet: {}", p.failure)
    } else {
        format!("Instruction {} failed: {}", p.failed_at + 1, p.failure)
    };
    format!(
        "Subtask: \"{}\"\nInstructions:\n{}\n\n{what}\n\n{}\n\n\
Previous errors in this session:\n{}\n\n\
Classify the error:
- minor: the instruction can be completed from this screen with one more instruction
  (wrong but visible button, mistyped text, target just needs a scroll);
- major: it cannot be completed from this screen (wrong page, missing field, element absent);
- unknown: you cannot tell.
If an earlier instruction was reported done but its effect is not on screen, name its number.

End with 'RESPONSE:' followed by these lines:
SEVERITY: minor|major|unknown
CAUSE: <what went wrong>
FIX: <how to fix it, or NONE>
REDO_FROM: <instruction number, or NONE>",
        p.subtask.description,
        numbered(p.instructions),
        screen_block(p.screen),
        render_errors(p.past_errors)
    )
}

pub fn resolve(diagnosis: &Diagnosis, subtask: &Subtask, instruction: &Instruction, screen: &ScreenState) -> String {
    let fix = diagnosis.fix.as_deref().unwrap_or("none");
    format!(
        "Help me solve this error.\nSubtask: \"{}\"\nFailed instruction: \"{}\"\n\
Cause: {}\nSeverity: {:?}\nFix proposed so far: {fix}\n\n{}",
        subtask.description,
        instruction,
        diagnosis.cause,
        diagnosis.severity,
        screen_block(screen)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::pipeline::normalize;
    use crate::perception::types::ScreenshotMeta;

    #[test]
    fn replan_prompt_marks_completed_prefix() {
        let task = Task::new("insert an image");
        let subtask = Subtask::pending(1, "open the image dialog");
        let prior = vec![Instruction::new("click Insert"), Instruction::new("click Image")];
        let diagnosis = Diagnosis::new("menu closed");
        let screen = normalize(vec![], ScreenshotMeta::new(1, 1), None);
        let text = replan(&ReplanPrompt {
            task: &task,
            subtask: &subtask,
            prior_instructions: &prior,
            failed_at: 1,
            diagnosis: &diagnosis,
            resolution: "reopen the menu",
            past_errors: &[],
            screen: &screen,
        });
        assert!(text.contains("1. click Insert\n2. click Image"));
        assert!(text.contains("Instructions 1 to 1 already took effect"));
        assert!(text.contains("Instruction 2 failed."));
        assert!(text.contains("Resolution: reopen the menu"));
    }

    #[test]
    fn replan_prompt_after_unmet_goal_keeps_everything() {
        let task = Task::new("save the document");
        let subtask = Subtask::pending(1, "save document");
        let prior = vec![Instruction::new("open File menu"), Instruction::new("click Save")];
        let diagnosis = Diagnosis::new("a confirmation dialog is open");
        let screen = normalize(vec![], ScreenshotMeta::new(1, 1), None);
        let text = replan(&ReplanPrompt {
            task: &task,
            subtask: &subtask,
            prior_instructions: &prior,
            failed_at: 2,
            diagnosis: &diagnosis,
            resolution: "confirm the dialog",
            past_errors: &[],
            screen: &screen,
        });
        assert!(text.contains("the subtask goal is unmet"));
        assert!(text.contains("additional instructions"));
        assert!(!text.contains("failed."));
        assert!(!text.contains("point of failure"));
    }

    #[test]
    fn diagnose_prompt_names_unmet_goal() {
        let subtask = Subtask::pending(1, "save document");
        let instructions = vec![Instruction::new("open File menu"), Instruction::new("click Save")];
        let screen = normalize(vec![], ScreenshotMeta::new(1, 1), None);
        let prompt = |goal_unmet| {
            diagnose(&DiagnosePrompt {
                subtask: &subtask,
                instructions: &instructions,
                failed_at: 1,
                goal_unmet,
                failure: "dialog still open",
                screen: &screen,
                past_errors: &[],
            })
        };
        let unmet = prompt(true);
        assert!(unmet.contains("All instructions reported done, but the subtask goal is unmet: dialog still open"));
        assert!(!unmet.contains("Instruction 2 failed"));
        assert!(prompt(false).contains("Instruction 2 failed: dialog still open"));
    }

    #[test]
    fn domain_is_mentioned_when_known() {
        let mut task = Task::new("download a picture");
        task.domain = Some("chrome".into());
        assert_eq!(task_line(&task), "Main task (chrome): \"download a picture\"");
    }
}
