use arrayforge::optimizer::cache::EvaluationStatus;
use arrayforge::optimizer::RunSummary;
use arrayforge::results::{ResultsTable, StatusSummary};
use arrayforge::worker::WorkerResult;
use comfy_table::presets::ASCII_FULL;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(ASCII_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn status_color(status: EvaluationStatus) -> Color {
    match status {
        EvaluationStatus::Success => Color::Green,
        EvaluationStatus::Rejected => Color::Yellow,
        _ => Color::Red,
    }
}

fn number(value: f64) -> String {
    if value.is_nan() {
        "-".to_string()
    } else {
        format!("{:.6e}", value)
    }
}

pub fn print_results_table(table_data: &ResultsTable) {
    let mut table = new_table();

    let mut header = vec![
        Cell::new("Index").add_attribute(Attribute::Bold),
        Cell::new("Status"),
        Cell::new("Cost").fg(Color::Cyan),
    ];
    header.extend(table_data.param_names.iter().map(Cell::new));
    header.extend(table_data.aux_names.iter().map(|n| Cell::new(n).fg(Color::Green)));
    table.add_row(header);

    let width = 3 + table_data.param_names.len() + table_data.aux_names.len();
    for i in 2..width {
        if let Some(col) = table.column_mut(i) {
            col.set_cell_alignment(CellAlignment::Right);
        }
    }

    let best = table_data.best().map(|r| r.index);
    for row in &table_data.rows {
        let mut index = Cell::new(row.index);
        if Some(row.index) == best {
            index = index.add_attribute(Attribute::Bold).fg(Color::Cyan);
        }
        let mut cells = vec![
            index,
            Cell::new(row.status).fg(status_color(row.status)),
            Cell::new(number(row.cost)),
        ];
        cells.extend(
            (0..table_data.param_names.len())
                .map(|i| Cell::new(row.params.get(i).map(|v| format!("{:.4}", v)).unwrap_or_default())),
        );
        cells.extend(
            row.values
                .iter()
                .map(|v| Cell::new(v.map(number).unwrap_or_else(|| "-".to_string()))),
        );
        table.add_row(cells);
    }
    println!("\n{}", table);
}

pub fn print_summary(summary: &StatusSummary) {
    let mut table = new_table();
    table.add_row(vec![
        Cell::new("Status").add_attribute(Attribute::Bold),
        Cell::new("Count"),
    ]);
    for (status, count) in &summary.counts {
        table.add_row(vec![
            Cell::new(status).fg(status_color(*status)),
            Cell::new(count).set_alignment(CellAlignment::Right),
        ]);
    }
    table.add_row(vec![
        Cell::new("Total").add_attribute(Attribute::Bold),
        Cell::new(summary.total).set_alignment(CellAlignment::Right),
    ]);
    println!("\n{}", table);

    match summary.best {
        Some((index, cost)) => println!("🏆 Best evaluation: #{} (cost {:.15e})", index, cost),
        None => println!("⚠️  No successful evaluations"),
    }
}

pub fn print_run_summary(summary: &RunSummary) {
    let mut table = new_table();
    table.add_row(vec![
        Cell::new("Termination").add_attribute(Attribute::Bold),
        Cell::new(summary.termination),
    ]);
    table.add_row(vec![Cell::new("Generations"), Cell::new(summary.generations)]);
    table.add_row(vec![Cell::new("Recorded evaluations"), Cell::new(summary.records)]);
    if let Some(best) = &summary.best {
        table.add_row(vec![
            Cell::new("Best cost"),
            Cell::new(format!("{:.15e} (#{})", best.cost, best.index)).fg(Color::Cyan),
        ]);
    }
    let favorite = summary
        .favorite
        .outcome
        .as_ref()
        .map(|o| o.status().to_string())
        .unwrap_or_default();
    table.add_row(vec![
        Cell::new("Favorite"),
        Cell::new(format!("{} ({})", number(summary.favorite.cost), favorite)),
    ]);
    println!("\n{}", table);
}

pub fn print_favorite(favorite: &WorkerResult) {
    let mut table = new_table();
    table.add_row(vec![
        Cell::new("Favorite").add_attribute(Attribute::Bold),
        Cell::new(favorite.status),
    ]);
    for (name, value) in favorite.values() {
        table.add_row(vec![
            Cell::new(name),
            Cell::new(number(value)).set_alignment(CellAlignment::Right),
        ]);
    }
    if let Some(e) = &favorite.error {
        table.add_row(vec![Cell::new("Error").fg(Color::Red), Cell::new(e)]);
    }
    println!("\n{}", table);
}

pub fn print_status(rows: &[(&str, String, u8)]) {
    let mut table = new_table();
    table.add_row(vec![
        Cell::new("Check").add_attribute(Attribute::Bold),
        Cell::new("State"),
    ]);
    for (name, message, code) in rows {
        let color = match code {
            1 => Color::Green,
            2 => Color::Yellow,
            _ => Color::Red,
        };
        table.add_row(vec![Cell::new(name), Cell::new(message).fg(color)]);
    }
    println!("\n{}", table);
}
