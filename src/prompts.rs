//! Prompt templates for the agents.
//!
//! Each function fills one template. Wording matters only insofar as it asks
//! for the output shape the parsers expect.

use crate::core::task::{TaskKey, EDA_KEY, SENSITIVITY_KEY};

const PLAIN_PROSE: &str = "Respond as comprehensively and in as much detail as possible. \
Use plain text without any Markdown formatting, written as one or more cohesive paragraphs. \
Avoid bullet points and numbered lists.";

pub const COORDINATOR_SYSTEM: &str = r#"Decide whether the user's text is a mathematical modeling problem.

If it is, restate it as a single JSON object without changing the problem text:

```json
{
  "title": "<problem title>",
  "background": "<everything that is not the title or one of the questions>",
  "ques_count": <number of questions, integer>,
  "ques1": "<question 1>",
  "ques2": "<question 2>"
}
```

Emit one quesN entry per question in the text, numbered from 1.

If it is not a modeling problem, reply with a short refusal instead."#;

/// Corrective system message appended after a failed coordinator attempt.
pub fn coordinator_correction(error: &str) -> String {
    format!(
        "{}\n\nYour previous response could not be used: {}. Reply strictly with the JSON object described above.",
        COORDINATOR_SYSTEM, error
    )
}

pub const MODELER_SYSTEM: &str = "You are an expert mathematical modeler.";

pub fn dependency_analysis(problem: &str, task_descriptions: &str, task_count: usize) -> String {
    format!(
        r#"Understanding the dependencies among the tasks of a mathematical modeling process is essential for a coherent, well-ordered solution. The problem below has been decomposed into {count} subtasks. Analyze how they depend on one another.

## Mathematical Modeling Problem
{problem}

## Decomposed Tasks
{tasks}

## Instructions
1. For each task, determine which other tasks provide the inputs, data or conditions it needs, and how earlier tasks constrain later ones.
2. Name the kind of each dependency: data (outputs consumed as inputs), methodological (builds on an earlier model or assumption), computational (needs earlier results computed first) or structural (must come first for logical reasons).
3. Account for every task and do not leave out essential dependencies.

Write plain text without Markdown, as {count} paragraphs, one per task."#,
        count = task_count,
        problem = problem,
        tasks = task_descriptions,
    )
}

pub fn dag_construction(
    problem: &str,
    task_descriptions: &str,
    task_count: usize,
    rationale: &str,
    keys: &[TaskKey],
) -> String {
    let example = match keys {
        [first, second, ..] => format!(
            "{{\n  \"{a}\": [],\n  \"{b}\": [\"{a}\"]\n}}",
            a = first,
            b = second
        ),
        [only] => format!("{{\n  \"{}\": []\n}}", only),
        [] => "{}".to_string(),
    };
    let key_list = keys
        .iter()
        .map(TaskKey::as_str)
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"Construct a directed acyclic graph of the dependencies between the {count} subtasks of the problem below. Capture every necessary dependency and make sure the graph has no cycles.

## Mathematical Modeling Problem
{problem}

## Decomposed Tasks
{tasks}

## Dependency Analysis
{rationale}

## Output Format (strict)
Return only a JSON adjacency list mapping each task ID to the list of task IDs it depends on. No prose, no comments, no code fences. Use exactly these task IDs: {key_list}.

Example:
{example}"#,
        count = task_count,
        problem = problem,
        tasks = task_descriptions,
        rationale = rationale,
        key_list = key_list,
        example = example,
    )
}

pub fn problem_analysis(problem: &str) -> String {
    format!(
        r#"# Mathematical Modeling Problem:
{problem}

---

Analyze this problem with a focus on its underlying concepts, reasoning and assumptions. Consider the primary objectives of a model and how they shape the approach. Examine the explicit and implicit assumptions and how they affect the interpretation of any solution. Look at the relationships between the components of the problem, the hidden complexities and tensions they create, and how the problem changes across scales, over time or under different scenarios. Consider alternative framings, the risks of competing modeling choices, and be ready to revise early conclusions.

{prose}"#,
        problem = problem,
        prose = PLAIN_PROSE,
    )
}

pub fn problem_analysis_critique(problem: &str, analysis: &str) -> String {
    format!(
        r#"# Mathematical Modeling Problem:
{problem}

# Problem Analysis:
{analysis}

---

Critically examine this analysis for depth of thinking, novelty of perspective, critical evaluation of results, rigor and precision, and awareness of the wider context. Point out weaknesses, gaps and limitations only; do not offer suggestions."#,
        problem = problem,
        analysis = analysis,
    )
}

pub fn problem_analysis_improvement(problem: &str, analysis: &str, critique: &str) -> String {
    format!(
        r#"# Mathematical Modeling Problem:
{problem}

# Problem Analysis:
{analysis}

# Problem Analysis Critique:
{critique}

---

Refine the analysis based on the critique. Give the improved analysis directly without mentioning the previous version or its deficiencies.

{prose}

IMPROVED PROBLEM ANALYSIS:"#,
        problem = problem,
        analysis = analysis,
        critique = critique,
        prose = PLAIN_PROSE,
    )
}

/// The problem statement handed to the modeling prompts, with earlier
/// results attached when there are any.
pub fn with_previous_context(problem: &str, context: &str) -> String {
    if context.trim().is_empty() {
        problem.to_string()
    } else {
        format!("{}\n\nContext from previous tasks:\n{}", problem, context)
    }
}

pub fn problem_modeling(problem: &str, analysis: &str) -> String {
    format!(
        r#"# Mathematical Modeling Problem:
{problem}

# Problem Analysis:
{analysis}

---

Design a mathematical model for this problem. State the assumptions that make it tractable, define the variables, parameters and constraints, and develop the governing equations and relationships, including feedback and non-linear effects where relevant. Outline a concrete solution strategy (analytical, numerical or optimization based) with its computational cost, describe how the results would be validated and how sensitive they are to the assumptions, and note how the model could be refined.

{prose}"#,
        problem = problem,
        analysis = analysis,
        prose = PLAIN_PROSE,
    )
}

pub fn problem_modeling_critique(problem: &str, analysis: &str, solution: &str) -> String {
    format!(
        r#"# Mathematical Modeling Problem:
{problem}

# Problem Analysis:
{analysis}

# Modeling Solution:
{solution}

---

Critically examine this modeling solution: understanding of the problem, mathematical rigor of the formulation, choice of technique, validation, treatment of data and results, sensitivity and robustness, stated and hidden assumptions, limitations, and practical applicability. Point out weaknesses, gaps and limitations only; do not offer suggestions."#,
        problem = problem,
        analysis = analysis,
        solution = solution,
    )
}

pub fn problem_modeling_improvement(
    problem: &str,
    analysis: &str,
    solution: &str,
    critique: &str,
) -> String {
    format!(
        r#"# Mathematical Modeling Problem:
{problem}

# Problem Analysis:
{analysis}

# Modeling Solution:
{solution}

# Modeling Solution Critique:
{critique}

---

Improve the modeling solution based on the critique: better assumptions, more robust techniques or alternative approaches where needed, with attention to accuracy and computational feasibility. Give the new solution directly without mentioning the previous version or its deficiencies.

{prose}

IMPROVED MODELING SOLUTION:"#,
        problem = problem,
        analysis = analysis,
        solution = solution,
        critique = critique,
        prose = PLAIN_PROSE,
    )
}

pub const CODER_SYSTEM: &str = r#"You are a code interpreter specializing in data analysis with Python (pandas, numpy, scipy, scikit-learn, matplotlib, seaborn).

- All data files are already in the working directory; open them with relative paths.
- To run code, reply with exactly one fenced ```python block. It is executed as a standalone script, so each block must import and load everything it needs.
- Save figures with descriptive file names in the working directory and print the key numbers.
- On an error, analyze it, simplify if needed, and send a corrected block. Never ask the user what to do.
- When the task is complete, reply with a short summary and no code block."#;

struct CodingBrief<'a> {
    data_summary: &'a str,
    dependent_files: &'a str,
    task_description: &'a str,
    formulas: &'a str,
    template: &'a str,
    extra: &'a str,
}

fn task_coding(brief: CodingBrief<'_>, model_solution: &str) -> String {
    format!(
        r#"Write high-quality Python code for the following task.

Task Context:
Data Files: all data files in the working directory
Data Summary: {data_summary}
Variable Description: read the data files for variable information
Dependent Files: {dependent_files}

Task Description:
{task_description}

Modeling Formulas & Logic:
{formulas}

Modeling Process:
{model_solution}

Requirements:
1. {template}
2. Handle potential errors gracefully.
3. Save generated figures and data files to the working directory.
4. {extra}"#,
        data_summary = brief.data_summary,
        dependent_files = brief.dependent_files,
        task_description = brief.task_description,
        formulas = brief.formulas,
        model_solution = model_solution,
        template = brief.template,
        extra = brief.extra,
    )
}

/// Coding prompt for `key`, picking the EDA, sensitivity or task variant.
pub fn coding_task(key: &TaskKey, description: &str, model_solution: &str) -> String {
    let brief = match key.as_str() {
        EDA_KEY => CodingBrief {
            data_summary: "compute descriptive statistics of the data",
            dependent_files: "none",
            task_description: "Exploratory data analysis of the data in the working directory: clean and visualise it, and save the cleaned data to the working directory.",
            formulas: "no complex models; focus on data exploration",
            template: "Use pandas and seaborn/matplotlib for analysis and plots.",
            extra: "Do not build complex models.",
        },
        SENSITIVITY_KEY => CodingBrief {
            data_summary: "see the earlier analysis",
            dependent_files: "use model results and data produced by earlier steps",
            task_description: "Sensitivity analysis: evaluate how changes in model parameters affect the results.",
            formulas: "see the modeling process below",
            template: "Write sensitivity analysis code and plot the sensitivity charts.",
            extra: "Keep the analysis focused on the most influential parameters.",
        },
        _ => CodingBrief {
            data_summary: "see the earlier data analysis, if any",
            dependent_files: "check the working directory for intermediate files (CSV, JSON, PKL) written by earlier tasks",
            task_description: description,
            formulas: "see the modeling process below",
            template: "Write standard Python code with the necessary comments and visualizations.",
            extra: "Print the final results clearly.",
        },
    };
    task_coding(brief, model_solution)
}

/// Corrective user turn after a snippet failed.
pub fn code_reflection(error: &str, code: &str, model_solution: Option<&str>) -> String {
    let mut prompt = format!(
        r#"The code execution encountered an error:
{error}

Analyze the error, identify the cause and provide a corrected version of the code. Check syntax, imports, names and types, and file paths. If the task keeps failing, break the code down, change approach or simplify the model. Do not ask what to do next."#,
        error = error
    );
    if let Some(solution) = model_solution.filter(|s| !s.trim().is_empty()) {
        prompt.push_str(&format!("\n\nModeling Process / Task Context:\n{}", solution));
    }
    prompt.push_str(&format!("\n\nPrevious code:\n{}", code));
    prompt
}

/// User turn after a snippet succeeded, asking whether more work remains.
pub fn completion_check(task_prompt: &str, output: &str) -> String {
    format!(
        r#"Determine whether the task is fully completed.

Original task: {task}

Latest execution results:
{output}

Have all data processing steps been completed and all files saved? Is the output satisfactory, with good visualization? Avoid repeating failing steps and finish in as few turns as possible.
If the task is complete, reply with a short summary of what was accomplished and no code block. Otherwise send the next ```python block."#,
        task = task_prompt,
        output = output
    )
}

pub const WRITER_SYSTEM: &str = r#"You are a professional writer for mathematical modeling competitions.

- Write the requested paper section in Markdown, without wrapping it in a code block.
- Inline formulas use $...$ and block formulas $$...$$.
- Reference figures on their own line as ![caption](filename), using only the file names you are given, placed after the paragraph that discusses them.
- Do not ask procedural questions."#;

/// Section prompt for one task, built from the coder's results.
pub fn writer_section(
    key: &TaskKey,
    background: &str,
    coder_response: &str,
    transcript: &str,
    artifacts: &[String],
) -> String {
    let figures = if artifacts.is_empty() {
        "none".to_string()
    } else {
        artifacts.join(", ")
    };
    format!(
        r#"Problem background: {background}

Do not write code. Using the coder's results below, write the paper section for {key}.

Coder summary:
{coder_response}

Execution output:
{transcript}

Available figures: {figures}"#,
        background = background,
        key = section_title(key.as_str()),
        coder_response = coder_response,
        transcript = transcript,
        figures = figures,
    )
}

/// Sections written after every task has finished, in paper order.
pub const CLOSING_SECTIONS: [&str; 6] = [
    "firstPage",
    "RepeatQues",
    "analysisQues",
    "modelAssumption",
    "symbol",
    "judge",
];

/// Prompt for one closing section.
pub fn closing_section(section: &str, problem: &str, solutions: &str) -> String {
    let (with_background, instruction) = match section {
        "firstPage" => (true, "write the title, abstract and keywords"),
        "RepeatQues" => (true, "write the problem restatement"),
        "analysisQues" => (true, "write the problem analysis"),
        "modelAssumption" => (true, "write the model assumptions"),
        "symbol" => (false, "write the table of symbols and their meanings"),
        "judge" => (false, "write the evaluation of the model, its strengths and weaknesses"),
        _ => (true, "write this section"),
    };
    let background = if with_background {
        format!("Problem background: {}\n\n", problem)
    } else {
        String::new()
    };
    format!(
        "{background}Do not write code. Based on the modeling and solution results below, {instruction}.\n\nResults:\n{solutions}",
        background = background,
        instruction = instruction,
        solutions = solutions,
    )
}

fn section_title(key: &str) -> String {
    match key {
        EDA_KEY => "the exploratory data analysis".to_string(),
        SENSITIVITY_KEY => "the sensitivity analysis".to_string(),
        other => match other.strip_prefix("ques") {
            Some(n) if !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()) => {
                format!("question {}", n)
            }
            _ => other.to_string(),
        },
    }
}
