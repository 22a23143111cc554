//! NAND FTL 常量定义
//!
//! 这个模块包含了 FTL 使用的所有常量，包括：
//! - 扇区与备用区尺寸
//! - 页头标记值
//! - 区域划分与缓存默认值

//=============================================================================
// 基础常量
//=============================================================================

/// 逻辑扇区大小（512 字节）
pub const SECTOR_SIZE: usize = 512;

/// 每个扇区对应的备用区字节数
pub const SPARE_PER_SECTOR: usize = 16;

/// 擦除后的字节值
pub const ERASED_BYTE: u8 = 0xFF;

/// 擦除后的 32 位字
pub const ERASED_WORD: u32 = 0xFFFF_FFFF;

//=============================================================================
// 页头标记
//=============================================================================

/// 坏块标记：好块
pub const BBM_GOOD: u8 = 0xFF;

/// 坏块标记：坏块
pub const BBM_BAD: u8 = 0x00;

/// 页数据损坏标记：干净
pub const COR_CLEAN: u8 = 0xFF;

/// 页数据损坏标记：复制自不可纠正的源页
pub const COR_CORRUPT: u8 = 0x00;

//=============================================================================
// 映射表
//=============================================================================

/// 映射表项大小（字节）
pub const TABLE_ENTRY_SIZE: usize = 4;

/// 映射表中未映射的表项
pub const UNMAPPED: u32 = ERASED_WORD;

//=============================================================================
// 区域划分
//=============================================================================

/// BTT 区域占总块数的百分比
pub const BTT_PERCENT: u32 = 3;

/// BTT 区域最少块数（日志压缩需要一个空闲块）
pub const MIN_BTT_BLOCKS: u32 = 2;

/// 第一个可用物理块（块 0 保留，FTL 不触碰）
pub const FIRST_USABLE_BLOCK: u32 = 1;

//=============================================================================
// 分配与缓存
//=============================================================================

/// 就绪队列深度（预擦除块数量）
pub const READY_QUEUE_DEPTH: usize = 3;

/// 默认低水位：队列深度不高于此值时先回收再分配
pub const DEFAULT_GC_LOW_WATER: usize = 1;

/// 默认块索引缓存容量
pub const DEFAULT_CACHED_BLOCKS: usize = 3;

/// 默认页缓存容量
pub const DEFAULT_CACHED_PAGES: usize = 2;

/// 默认映射表扇区缓存容量
pub const DEFAULT_CACHED_TABLE_SECTORS: usize = 2;

//=============================================================================
// 地址周期
//=============================================================================

/// 行地址超过该值需要 3 个行周期
pub const ROW_CYCLE_THRESHOLD: u64 = 65536;

/// 页大小超过该值需要 2 个列周期
pub const COLUMN_CYCLE_THRESHOLD: u32 = 512;
