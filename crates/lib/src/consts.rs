/// Application name, used for logging targets and user-facing messages.
pub const APP_NAME: &str = "frontbuild";

/// Archive path of the synthesized build file inside every build context.
pub const BUILD_FILE_NAME: &str = "Dockerfile";

/// Label the build step attaches so the resulting image can be found and promoted.
pub const BUILD_TAG_LABEL: &str = "build_tag";

/// Line that opens and closes the YAML front matter block.
pub const FRONT_MATTER_DELIMITER: &str = "---";

/// Docker Engine API version the client speaks.
pub const DOCKER_API_VERSION: &str = "1.24";

/// Daemon address used when `DOCKER_HOST` is not set.
pub const DEFAULT_DOCKER_HOST: &str = "unix:///var/run/docker.sock";

/// Length of the truncated object ids used by the in-memory object store.
pub const OBJ_HASH_PREFIX_LEN: usize = 20;

/// Directory name excluded when loading a cloned worktree into a store.
pub const GIT_DIR_NAME: &str = ".git";
