use std::fs;

use assert_cmd::Command;
use predicates::str::contains;
use tablecast::schema::{ColumnType, TextFormat, TrimChoice};
use tempfile::tempdir;

/// A report export the way tools actually emit them: a banner line, a blank
/// line, a header row, data, and a trailing blank line.
const MESSY_REPORT: &str = "\
ACME quarterly export

Name,Joined,Score
Alice,2019-10-01,10
Bob,2019-11-05,8
Carol,2019-12-24,9

";

const CLEAN_PEOPLE: &str = "Name,Age\nAlice,30\nBob,5\nCara,22\nDan,40\n";

fn tablecast() -> Command {
    Command::cargo_bin("tablecast").expect("binary exists")
}

#[test]
fn probe_reports_stages_and_columns() {
    let dir = tempdir().expect("temp dir");
    let input = dir.path().join("report.csv");
    fs::write(&input, MESSY_REPORT).expect("write input");

    tablecast()
        .args(["probe", "-i", input.to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains("charset"))
        .stdout(contains("UTF-8"))
        .stdout(contains("','"))
        .stdout(contains("3,1,0,0"))
        .stdout(contains("Joined"))
        .stdout(contains("date(%Y-%m-%d)"))
        .stdout(contains("numeric"));
}

#[test]
fn probe_writes_format_sidecar() {
    let dir = tempdir().expect("temp dir");
    let input = dir.path().join("report.csv");
    fs::write(&input, MESSY_REPORT).expect("write input");
    let sidecar = dir.path().join("report.format.yaml");

    tablecast()
        .args([
            "probe",
            "-i",
            input.to_str().unwrap(),
            "-f",
            sidecar.to_str().unwrap(),
        ])
        .assert()
        .success();

    let format = TextFormat::load(&sidecar).expect("sidecar parses");
    assert_eq!(format.charset, "UTF-8");
    assert_eq!(format.separator, Some(','));
    assert_eq!(format.quote, None);
    assert_eq!(format.trim, TrimChoice::new(3, 1, 0, 0));
    let names: Vec<&str> = format
        .columns
        .iter()
        .map(|column| column.id.as_str())
        .collect();
    assert_eq!(names, ["Name", "Joined", "Score"]);
    assert_eq!(format.columns[0].column_type, ColumnType::Text);
    assert_eq!(
        format.columns[1].column_type.to_string(),
        "date(%Y-%m-%d)"
    );
}

#[test]
fn probe_emits_json_report() {
    let dir = tempdir().expect("temp dir");
    let input = dir.path().join("report.csv");
    fs::write(&input, MESSY_REPORT).expect("write input");

    let output = tablecast()
        .args(["probe", "-i", input.to_str().unwrap(), "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let report: serde_json::Value = serde_json::from_slice(&output).expect("json report");
    assert_eq!(report["charset"], "UTF-8");
    assert_eq!(report["separator"], ",");
    assert!(report["quote"].is_null());
    assert_eq!(report["trim"]["top"], 3);
    assert_eq!(report["columns"][0]["name"], "Name");
    assert_eq!(report["columns"][1]["column_type"], "date(%Y-%m-%d)");
}

#[test]
fn import_emits_clean_utf8_csv() {
    let dir = tempdir().expect("temp dir");
    let input = dir.path().join("report.csv");
    fs::write(&input, MESSY_REPORT).expect("write input");
    let output = dir.path().join("clean.csv");

    tablecast()
        .args([
            "import",
            "-i",
            input.to_str().unwrap(),
            "-o",
            output.to_str().unwrap(),
        ])
        .assert()
        .success();

    let written = fs::read_to_string(&output).expect("read output");
    assert_eq!(
        written,
        "\"Name\",\"Joined\",\"Score\"\n\
         \"Alice\",\"2019-10-01\",\"10\"\n\
         \"Bob\",\"2019-11-05\",\"8\"\n\
         \"Carol\",\"2019-12-24\",\"9\"\n"
    );
}

#[test]
fn import_honors_saved_sidecar_and_limit() {
    let dir = tempdir().expect("temp dir");
    let input = dir.path().join("report.csv");
    fs::write(&input, MESSY_REPORT).expect("write input");
    let sidecar = dir.path().join("report.format.yaml");
    tablecast()
        .args([
            "probe",
            "-i",
            input.to_str().unwrap(),
            "-f",
            sidecar.to_str().unwrap(),
        ])
        .assert()
        .success();

    let output = dir.path().join("clean.csv");
    tablecast()
        .args([
            "import",
            "-i",
            input.to_str().unwrap(),
            "-f",
            sidecar.to_str().unwrap(),
            "-o",
            output.to_str().unwrap(),
            "--limit",
            "2",
        ])
        .assert()
        .success();

    let written = fs::read_to_string(&output).expect("read output");
    assert_eq!(
        written,
        "\"Name\",\"Joined\",\"Score\"\n\
         \"Alice\",\"2019-10-01\",\"10\"\n\
         \"Bob\",\"2019-11-05\",\"8\"\n"
    );
}

#[test]
fn import_decodes_windows_1252_to_utf8() {
    let dir = tempdir().expect("temp dir");
    let input = dir.path().join("drinks.csv");
    fs::write(&input, b"Drink,Qty\ncaf\xE9,2\ntea,3\n").expect("write input");
    let output = dir.path().join("clean.csv");

    tablecast()
        .args([
            "import",
            "-i",
            input.to_str().unwrap(),
            "-o",
            output.to_str().unwrap(),
        ])
        .assert()
        .success();

    let written = fs::read_to_string(&output).expect("output is valid utf-8");
    assert!(written.contains("\"café\",\"2\""));
}

#[test]
fn import_reads_stdin_and_renders_table() {
    tablecast()
        .args(["import", "-i", "-", "--table"])
        .write_stdin(CLEAN_PEOPLE)
        .assert()
        .success()
        .stdout(contains("Name"))
        .stdout(contains("Alice"))
        .stdout(contains("----"));
}

#[test]
fn process_filters_calculates_and_sorts() {
    let dir = tempdir().expect("temp dir");
    let input = dir.path().join("people.csv");
    fs::write(&input, CLEAN_PEOPLE).expect("write input");
    let output = dir.path().join("out.csv");

    tablecast()
        .args([
            "process",
            "-i",
            input.to_str().unwrap(),
            "-o",
            output.to_str().unwrap(),
            "--filter",
            "Age > 10",
            "--calc",
            "Doubled=Age * 2",
            "--sort",
            "Age:desc",
        ])
        .assert()
        .success();

    let written = fs::read_to_string(&output).expect("read output");
    assert_eq!(
        written,
        "\"Name\",\"Age\",\"Doubled\"\n\
         \"Dan\",\"40\",\"80\"\n\
         \"Alice\",\"30\",\"60\"\n\
         \"Cara\",\"22\",\"44\"\n"
    );
}

#[test]
fn process_rejects_unknown_filter_column() {
    let dir = tempdir().expect("temp dir");
    let input = dir.path().join("people.csv");
    fs::write(&input, CLEAN_PEOPLE).expect("write input");

    tablecast()
        .args([
            "process",
            "-i",
            input.to_str().unwrap(),
            "--filter",
            "Salary > 1",
        ])
        .assert()
        .failure()
        .stderr(contains("Salary"));
}

#[test]
fn concat_stacks_tables_with_source_column() {
    let dir = tempdir().expect("temp dir");
    let jan = dir.path().join("sales_jan.csv");
    fs::write(&jan, "Region,Amount\nNorth,10\nSouth,20\n").expect("write jan");
    let feb = dir.path().join("sales_feb.csv");
    fs::write(&feb, "Region,Amount\nEast,5\n").expect("write feb");
    let output = dir.path().join("out.csv");

    tablecast()
        .args([
            "concat",
            "-i",
            jan.to_str().unwrap(),
            "-i",
            feb.to_str().unwrap(),
            "-o",
            output.to_str().unwrap(),
            "--source-column",
        ])
        .assert()
        .success();

    let written = fs::read_to_string(&output).expect("read output");
    assert_eq!(
        written,
        "\"Source\",\"Region\",\"Amount\"\n\
         \"sales_jan\",\"North\",\"10\"\n\
         \"sales_jan\",\"South\",\"20\"\n\
         \"sales_feb\",\"East\",\"5\"\n"
    );
}

#[test]
fn concat_rejects_conflicting_column_types() {
    let dir = tempdir().expect("temp dir");
    let jan = dir.path().join("sales_jan.csv");
    fs::write(&jan, "Region,Amount\nNorth,10\nSouth,20\n").expect("write jan");
    let feb = dir.path().join("sales_feb.csv");
    fs::write(&feb, "Region,Amount,Code\nEast,lots,5\n").expect("write feb");

    tablecast()
        .args([
            "concat",
            "-i",
            jan.to_str().unwrap(),
            "-i",
            feb.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(contains("Amount"))
        .stderr(contains("conflicting types"));
}

#[test]
fn concat_requires_two_inputs() {
    let dir = tempdir().expect("temp dir");
    let only = dir.path().join("only.csv");
    fs::write(&only, CLEAN_PEOPLE).expect("write input");

    tablecast()
        .args(["concat", "-i", only.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(contains("at least two"));
}
