use crate::domain::artifact::Artifact;
use crate::domain::model::SecretDeclaration;
use crate::domain::resolved::ResolvedModel;
use crate::utils::error::Result;
use async_trait::async_trait;
use std::path::PathBuf;

pub trait Storage: Send + Sync {
    fn read_file(&self, path: &str) -> impl std::future::Future<Output = Result<Vec<u8>>> + Send;
    fn write_file(
        &self,
        path: &str,
        data: &[u8],
    ) -> impl std::future::Future<Output = Result<()>> + Send;
}

/// 機密定位能力：給定機密與環境，回傳執行期取得該值的位置
pub trait SecretLocator {
    fn locator_for(&self, secret: &SecretDeclaration, environment: &str) -> String;
}

/// 產物產生器：從已解析模型產生文件，不得有副作用
pub trait Emitter: Send + Sync {
    fn name(&self) -> &'static str;
    fn emit(&self, model: &ResolvedModel) -> Result<Vec<Artifact>>;
}

/// 發佈一組完整的產物；失敗時不得留下部分輸出
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, artifacts: &[Artifact]) -> Result<PathBuf>;
}
