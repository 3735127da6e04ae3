use printlink_rs::board::Board;
use printlink_rs::config::Config;
use printlink_rs::print_job::{CommandSource, JobError, ReaderSource};
use printlink_rs::printer::PrinterStatus;
use std::io::Write;
use tempfile::NamedTempFile;
use tokio_test::assert_ok;

fn gcode_file(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[tokio::test]
async fn test_file_source_reads_raw_lines() {
    let file = gcode_file("G28\r\n; home done\nG1 X5");
    let mut source = ReaderSource::open(file.path()).await.unwrap();
    assert_eq!(source.total_length().await.unwrap(), 22);
    source.rewind().await.unwrap();

    let mut lines = Vec::new();
    let mut total = 0;
    loop {
        let mut buf = Vec::new();
        let n = source.read_line(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        total += n;
        lines.push(String::from_utf8(buf).unwrap());
    }
    assert_eq!(lines, ["G28\r\n", "; home done\n", "G1 X5"]);
    assert_eq!(total, 22);
}

#[tokio::test]
async fn test_start_job_sizes_source_and_marks_printing() {
    let board = Board::new(&Config::default());
    let file = gcode_file("G28\nG1 X10\n");
    let source = ReaderSource::open(file.path()).await.unwrap();

    let info = assert_ok!(board.start_job("part.gcode", Box::new(source)).await);
    assert_eq!(info.name, "part.gcode");
    assert_eq!(info.total_size, 11);
    assert_eq!(board.status().await, PrinterStatus::Printing);
    assert_eq!(board.progress().await, 0.0);
    assert_eq!(board.current_job().await, Some(info));
}

#[tokio::test]
async fn test_only_one_job_at_a_time() {
    let board = Board::new(&Config::default());
    assert_ok!(
        board
            .start_job("first", Box::new(ReaderSource::from_bytes("G28\n")))
            .await
    );
    let err = board
        .start_job("second", Box::new(ReaderSource::from_bytes("G28\n")))
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::AlreadyActive));
    assert_eq!(board.current_job().await.unwrap().name, "first");
}

#[tokio::test]
async fn test_shutdown_closes_open_job() {
    let board = Board::new(&Config::default());
    board
        .start_job("abandoned", Box::new(ReaderSource::from_bytes("G28\n")))
        .await
        .unwrap();
    board.shutdown().await;
    assert!(board.current_job().await.is_none());
    assert_eq!(board.status().await, PrinterStatus::Unknown);
    let report = board.last_job().await.unwrap();
    assert_eq!(report.bytes_consumed, 0);
}
