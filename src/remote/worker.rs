//! The worker interface: everything the control plane does on the DAQ
//! machines themselves. One instance wraps one open shell session; close
//! it when done, Drop tears the session down if you forget.
use super::error::RemoteError;
use super::shell::{quoted, RemoteShell};

const ECC_SERVER_PROCESS: &str = "getEccSoapServer";
const DATA_ROUTER_PROCESS: &str = "dataRouter";
/// How much of a remote log we pull back for display
const TAIL_BYTES: u32 = 4000;

/// The run directory name for a run number, e.g. run_0007
pub fn run_dir_name(run_number: i32) -> String {
    format!("run_{:04}", run_number)
}

pub struct WorkerInterface {
    shell: Box<dyn RemoteShell>,
}

impl WorkerInterface {
    pub fn new(shell: Box<dyn RemoteShell>) -> Self {
        Self { shell }
    }

    /// Explicitly tear the session down, surfacing teardown errors
    pub async fn close(mut self) -> Result<(), RemoteError> {
        self.shell.close().await
    }

    /// Is getEccSoapServer running on the host
    pub async fn check_ecc_server_status(&self) -> Result<bool, RemoteError> {
        self.process_is_running(ECC_SERVER_PROCESS).await
    }

    /// Is dataRouter running on the host
    pub async fn check_data_router_status(&self) -> Result<bool, RemoteError> {
        self.process_is_running(DATA_ROUTER_PROCESS).await
    }

    async fn process_is_running(&self, process: &str) -> Result<bool, RemoteError> {
        let output = self.shell.run("ps -ax -o command").await?;
        let result = output.lines().any(|line| line.contains(process));
        Ok(result)
    }

    /// The working directory of the running dataRouter, which is where it
    /// writes its .graw files. The lsof field output gives one line per
    /// field: p<pid>, c<command>, n<name>.
    pub async fn find_data_router(&self) -> Result<String, RemoteError> {
        let output = self
            .shell
            .run("lsof -a -d cwd -c dataRouter -Fcn")
            .await?;
        for line in output.lines() {
            if line.starts_with('p') {
                continue;
            }
            if let Some(command) = line.strip_prefix('c') {
                if command != DATA_ROUTER_PROCESS {
                    return Err(RemoteError::WrongProcess(command.to_string()));
                }
            } else if let Some(path) = line.strip_prefix('n') {
                return Ok(path.trim().to_string());
            }
        }
        Err(RemoteError::NotRunning(DATA_ROUTER_PROCESS))
    }

    /// Every .graw file currently sitting in the dataRouter working
    /// directory, as absolute paths
    pub async fn get_graw_list(&self) -> Result<Vec<String>, RemoteError> {
        let pwd = self.find_data_router().await?;
        self.graw_list_in(&pwd).await
    }

    async fn graw_list_in(&self, pwd: &str) -> Result<Vec<String>, RemoteError> {
        let output = self
            .shell
            .run(&format!("ls -1 {}/*.graw", quoted(pwd)))
            .await?;
        // A failed glob just means nothing is there yet
        if !output.success() {
            return Ok(Vec::new());
        }
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|line| line.ends_with(".graw"))
            .map(String::from)
            .collect())
    }

    /// A run may start only when no leftover .graw files sit in the
    /// staging directory
    pub async fn working_dir_is_clean(&self) -> Result<bool, RemoteError> {
        Ok(self.get_graw_list().await?.is_empty())
    }

    /// Move the .graw files of a finished run into
    /// `<pwd>/<experiment>/run_NNNN`. One mkdir, one mv; if the staging
    /// directory is already empty nothing is moved, so re-running for the
    /// same run number is safe.
    pub async fn organize_files(
        &self,
        experiment: &str,
        run_number: i32,
    ) -> Result<(), RemoteError> {
        let pwd = self.find_data_router().await?;
        let graws = self.graw_list_in(&pwd).await?;
        let run_dir = format!("{}/{}/{}", pwd, experiment, run_dir_name(run_number));

        let mkdir = format!("mkdir -p {}", quoted(&run_dir));
        let output = self.shell.run(&mkdir).await?;
        if !output.success() {
            return Err(RemoteError::CommandFailed(mkdir, output.stderr));
        }

        if graws.is_empty() {
            return Ok(());
        }
        let files: Vec<String> = graws.iter().map(|f| quoted(f).into_owned()).collect();
        let mv = format!("mv {} {}", files.join(" "), quoted(&run_dir));
        let output = self.shell.run(&mv).await?;
        if !output.success() {
            return Err(RemoteError::CommandFailed(mv, output.stderr));
        }
        Ok(())
    }

    /// The trailing bytes of a remote file, for showing logs in the UI
    pub async fn tail_file(&self, path: &str) -> Result<String, RemoteError> {
        let output = self
            .shell
            .run(&format!("tail -c {} {}", TAIL_BYTES, quoted(path)))
            .await?;
        Ok(output.stdout)
    }

    /// Where the files of a given run end up on this host
    pub async fn build_run_dir_path(
        &self,
        experiment: &str,
        run_number: i32,
    ) -> Result<String, RemoteError> {
        let pwd = self.find_data_router().await?;
        Ok(format!("{}/{}/{}", pwd, experiment, run_dir_name(run_number)))
    }

    /// Snapshot config files into `<dest_root>/<experiment>/run_NNNN` at
    /// the end of a run
    pub async fn backup_config_files(
        &self,
        experiment: &str,
        run_number: i32,
        paths: &[String],
        dest_root: &str,
    ) -> Result<(), RemoteError> {
        let run_dir = format!("{}/{}/{}", dest_root, experiment, run_dir_name(run_number));
        let mkdir = format!("mkdir -p {}", quoted(&run_dir));
        let output = self.shell.run(&mkdir).await?;
        if !output.success() {
            return Err(RemoteError::CommandFailed(mkdir, output.stderr));
        }
        if paths.is_empty() {
            return Ok(());
        }
        let files: Vec<String> = paths.iter().map(|p| quoted(p).into_owned()).collect();
        let cp = format!("cp {} {}", files.join(" "), quoted(&run_dir));
        let output = self.shell.run(&cp).await?;
        if !output.success() {
            return Err(RemoteError::CommandFailed(cp, output.stderr));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::shell::CmdOutput;
    use crate::remote::testing::ScriptedShell;
    use std::sync::Arc;

    const ROUTER_PATH: &str = "/path/to/router";

    fn lsof_reply() -> String {
        format!("p1234\ncdataRouter\nn{ROUTER_PATH}\n")
    }

    fn worker(shell: &Arc<ScriptedShell>) -> WorkerInterface {
        WorkerInterface::new(Box::new(shell.clone()))
    }

    #[tokio::test]
    async fn find_data_router_returns_the_n_line_payload() {
        let shell = ScriptedShell::new().on("lsof", &lsof_reply());
        let path = worker(&shell).find_data_router().await.unwrap();
        assert_eq!(path, ROUTER_PATH);
    }

    #[tokio::test]
    async fn find_data_router_fails_when_nothing_is_running() {
        let shell = ScriptedShell::new().on("lsof", "");
        let err = worker(&shell).find_data_router().await.unwrap_err();
        assert!(matches!(err, RemoteError::NotRunning(_)));
    }

    #[tokio::test]
    async fn find_data_router_rejects_a_different_process() {
        let shell = ScriptedShell::new().on("lsof", "p1234\ncsomeProgram\nn/some/path\n");
        let err = worker(&shell).find_data_router().await.unwrap_err();
        match err {
            RemoteError::WrongProcess(found) => assert_eq!(found, "someProgram"),
            other => panic!("expected WrongProcess, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn check_ecc_server_status_matches_the_ps_listing() {
        let shell = ScriptedShell::new().on(
            "ps",
            " 1234 ??  0:01.23 /path/to/getEccSoapServer --args something\n",
        );
        assert!(worker(&shell).check_ecc_server_status().await.unwrap());

        let shell = ScriptedShell::new().on("ps", " 1 ??  0:00.01 /sbin/launchd\n");
        assert!(!worker(&shell).check_ecc_server_status().await.unwrap());
    }

    #[tokio::test]
    async fn check_data_router_status_matches_the_ps_listing() {
        let shell = ScriptedShell::new().on(
            "ps",
            " 1235 ??  0:03.45 /path/to/dataRouter --args 123.45.67.89\n",
        );
        assert!(worker(&shell).check_data_router_status().await.unwrap());

        let shell = ScriptedShell::new().on("ps", "");
        assert!(!worker(&shell).check_data_router_status().await.unwrap());
    }

    #[tokio::test]
    async fn graw_list_filters_non_graw_lines_and_tolerates_a_failed_glob() {
        let shell = ScriptedShell::new()
            .on("lsof", &lsof_reply())
            .on("ls -1", "/path/to/router/test1.graw\n/path/to/router/test2.graw\n");
        let graws = worker(&shell).get_graw_list().await.unwrap();
        assert_eq!(
            graws,
            vec![
                String::from("/path/to/router/test1.graw"),
                String::from("/path/to/router/test2.graw"),
            ]
        );

        let shell = ScriptedShell::new().on("lsof", &lsof_reply()).on_output(
            "ls -1",
            CmdOutput {
                stdout: String::new(),
                stderr: String::from("ls: cannot access"),
                status: 2,
            },
        );
        let worker = worker(&shell);
        assert!(worker.get_graw_list().await.unwrap().is_empty());
        assert!(worker.working_dir_is_clean().await.unwrap());
    }

    #[tokio::test]
    async fn organize_files_issues_one_mkdir_and_one_mv() {
        let shell = ScriptedShell::new()
            .on("lsof", &lsof_reply())
            .on("ls -1", "test1.graw\ntest2.graw\n");
        worker(&shell)
            .organize_files("experiment_name", 1)
            .await
            .unwrap();

        let commands = shell.commands.lock();
        let mkdirs: Vec<&String> = commands.iter().filter(|c| c.starts_with("mkdir")).collect();
        let mvs: Vec<&String> = commands.iter().filter(|c| c.starts_with("mv")).collect();
        assert_eq!(
            mkdirs,
            vec!["mkdir -p /path/to/router/experiment_name/run_0001"]
        );
        assert_eq!(
            mvs,
            vec!["mv test1.graw test2.graw /path/to/router/experiment_name/run_0001"]
        );
    }

    #[tokio::test]
    async fn organize_files_quotes_names_with_spaces() {
        let shell = ScriptedShell::new()
            .on("lsof", &lsof_reply())
            .on("ls -1", "test1.graw\ntest2.graw\n");
        worker(&shell)
            .organize_files("name with spaces", 1)
            .await
            .unwrap();

        let commands = shell.commands.lock();
        assert!(commands
            .iter()
            .any(|c| c == "mkdir -p '/path/to/router/name with spaces/run_0001'"));
        assert!(commands
            .iter()
            .any(|c| c == "mv test1.graw test2.graw '/path/to/router/name with spaces/run_0001'"));
    }

    #[tokio::test]
    async fn organize_files_with_clean_directory_skips_the_move() {
        let shell = ScriptedShell::new().on("lsof", &lsof_reply()).on("ls -1", "");
        worker(&shell).organize_files("experiment_name", 7).await.unwrap();
        let commands = shell.commands.lock();
        assert!(commands.iter().any(|c| c.starts_with("mkdir")));
        assert!(!commands.iter().any(|c| c.starts_with("mv")));
    }

    #[tokio::test]
    async fn build_run_dir_path_joins_pwd_experiment_and_run() {
        let shell = ScriptedShell::new().on("lsof", &lsof_reply());
        let path = worker(&shell)
            .build_run_dir_path("experiment", 1)
            .await
            .unwrap();
        assert_eq!(path, "/path/to/router/experiment/run_0001");
    }

    #[tokio::test]
    async fn backup_config_files_mkdirs_then_copies() {
        let shell = ScriptedShell::new();
        let files = vec![String::from("/path/to/a/config/file.xcfg")];
        worker(&shell)
            .backup_config_files("experiment", 1, &files, "/backup/destination")
            .await
            .unwrap();
        let commands = shell.commands.lock();
        assert_eq!(
            *commands,
            vec![
                String::from("mkdir -p /backup/destination/experiment/run_0001"),
                String::from(
                    "cp /path/to/a/config/file.xcfg /backup/destination/experiment/run_0001"
                ),
            ]
        );
    }

    #[tokio::test]
    async fn tail_file_pulls_trailing_bytes() {
        let shell = ScriptedShell::new().on("tail", "last lines of the log");
        let text = worker(&shell)
            .tail_file("/var/log/dataRouter.log")
            .await
            .unwrap();
        assert_eq!(text, "last lines of the log");
        let commands = shell.commands.lock();
        assert_eq!(commands[0], "tail -c 4000 /var/log/dataRouter.log");
    }

    #[tokio::test]
    async fn close_tears_the_session_down() {
        let shell = ScriptedShell::new();
        worker(&shell).close().await.unwrap();
        assert!(shell.was_closed());
    }

    #[test]
    fn run_dir_names_are_zero_padded() {
        assert_eq!(run_dir_name(0), "run_0000");
        assert_eq!(run_dir_name(7), "run_0007");
        assert_eq!(run_dir_name(123), "run_0123");
        assert_eq!(run_dir_name(12345), "run_12345");
    }
}
