// 命令行入口
fn main() -> std::process::ExitCode {
    rawcull_lib::run()
}
