// 该文件是 Kansun （勘损） 项目的一部分。
// src/geometry.rs - 几何计算内核
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use serde::{Deserialize, Serialize};

/// 归一化坐标空间（0 - 1000）中的点
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
  pub x: f64,
  pub y: f64,
}

impl Point {
  pub const fn new(x: f64, y: f64) -> Self {
    Point { x, y }
  }
}

impl From<(f64, f64)> for Point {
  fn from((x, y): (f64, f64)) -> Self {
    Point { x, y }
  }
}

/// 轴对齐包围盒
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
  pub min_x: f64,
  pub min_y: f64,
  pub max_x: f64,
  pub max_y: f64,
}

impl BoundingBox {
  pub fn width(&self) -> f64 {
    self.max_x - self.min_x
  }

  pub fn height(&self) -> f64 {
    self.max_y - self.min_y
  }

  pub fn area(&self) -> f64 {
    self.width() * self.height()
  }

  pub fn center(&self) -> Point {
    Point::new(
      (self.min_x + self.max_x) / 2.0,
      (self.min_y + self.max_y) / 2.0,
    )
  }

  /// 较长的一条边，用于长度测量
  pub fn longest_side(&self) -> f64 {
    self.width().max(self.height())
  }

  /// 两个包围盒重叠矩形的面积，不重叠时为 0
  pub fn intersection_area(&self, other: &BoundingBox) -> f64 {
    let w = (self.max_x.min(other.max_x) - self.min_x.max(other.min_x)).max(0.0);
    let h = (self.max_y.min(other.max_y) - self.min_y.max(other.min_y)).max(0.0);
    w * h
  }
}

/// IoU 计算方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IouMode {
  /// 包围盒近似，基准数据均以此方式计算
  #[default]
  BoundingBox,
  /// 多边形裁剪，第二个多边形为凸多边形时结果精确
  ExactPolygon,
}

/// 鞋带公式求多边形面积，少于 3 个点时为 0
pub fn polygon_area(points: &[Point]) -> f64 {
  if points.len() < 3 {
    return 0.0;
  }

  let n = points.len();
  let twice: f64 = (0..n)
    .map(|i| {
      let a = points[i];
      let b = points[(i + 1) % n];
      a.x * b.y - b.x * a.y
    })
    .sum();

  twice.abs() / 2.0
}

/// 点集的包围盒，空输入返回零尺寸包围盒
pub fn bounding_box(points: &[Point]) -> BoundingBox {
  let Some(first) = points.first() else {
    return BoundingBox::default();
  };

  points.iter().skip(1).fold(
    BoundingBox {
      min_x: first.x,
      min_y: first.y,
      max_x: first.x,
      max_y: first.y,
    },
    |bbox, p| BoundingBox {
      min_x: bbox.min_x.min(p.x),
      min_y: bbox.min_y.min(p.y),
      max_x: bbox.max_x.max(p.x),
      max_y: bbox.max_y.max(p.y),
    },
  )
}

/// 基于包围盒近似的 IoU
///
/// 交集取两个包围盒的重叠矩形，并集为两个包围盒面积之和减去交集。
/// 对旋转或凹多边形会低估重叠程度，但与已有基准结果保持数值一致。
/// 任一多边形少于 3 个点或并集为 0 时返回 0。
pub fn iou(a: &[Point], b: &[Point]) -> f64 {
  if a.len() < 3 || b.len() < 3 {
    return 0.0;
  }

  let box_a = bounding_box(a);
  let box_b = bounding_box(b);
  let intersection = box_a.intersection_area(&box_b);
  let union = box_a.area() + box_b.area() - intersection;

  if union > 0.0 {
    (intersection / union).clamp(0.0, 1.0)
  } else {
    0.0
  }
}

/// 按指定方式计算 IoU
pub fn iou_with(mode: IouMode, a: &[Point], b: &[Point]) -> f64 {
  match mode {
    IouMode::BoundingBox => iou(a, b),
    IouMode::ExactPolygon => polygon_iou(a, b),
  }
}

fn polygon_iou(a: &[Point], b: &[Point]) -> f64 {
  let area_a = polygon_area(a);
  let area_b = polygon_area(b);
  if area_a == 0.0 || area_b == 0.0 {
    return 0.0;
  }

  let intersection = polygon_area(&clip_polygon(a, b));
  let union = area_a + area_b - intersection;

  if union > 0.0 {
    (intersection / union).clamp(0.0, 1.0)
  } else {
    0.0
  }
}

/// Sutherland–Hodgman 裁剪，`clip` 需为凸多边形
fn clip_polygon(subject: &[Point], clip: &[Point]) -> Vec<Point> {
  let mut clip = clip.to_vec();
  // 统一为逆时针方向
  if signed_area(&clip) < 0.0 {
    clip.reverse();
  }

  let mut output = subject.to_vec();
  for i in 0..clip.len() {
    if output.is_empty() {
      break;
    }
    let edge_start = clip[i];
    let edge_end = clip[(i + 1) % clip.len()];
    let input = std::mem::take(&mut output);

    for j in 0..input.len() {
      let current = input[j];
      let previous = input[(j + input.len() - 1) % input.len()];
      let current_inside = is_left_of(edge_start, edge_end, current);
      let previous_inside = is_left_of(edge_start, edge_end, previous);

      if current_inside {
        if !previous_inside {
          output.push(line_intersection(previous, current, edge_start, edge_end));
        }
        output.push(current);
      } else if previous_inside {
        output.push(line_intersection(previous, current, edge_start, edge_end));
      }
    }
  }

  output
}

fn signed_area(points: &[Point]) -> f64 {
  let n = points.len();
  (0..n)
    .map(|i| {
      let a = points[i];
      let b = points[(i + 1) % n];
      a.x * b.y - b.x * a.y
    })
    .sum::<f64>()
    / 2.0
}

fn is_left_of(a: Point, b: Point, p: Point) -> bool {
  (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x) >= 0.0
}

fn line_intersection(p1: Point, p2: Point, q1: Point, q2: Point) -> Point {
  let denom = (p1.x - p2.x) * (q1.y - q2.y) - (p1.y - p2.y) * (q1.x - q2.x);
  if denom == 0.0 {
    return p2;
  }
  let t = ((p1.x - q1.x) * (q1.y - q2.y) - (p1.y - q1.y) * (q1.x - q2.x)) / denom;
  Point::new(p1.x + t * (p2.x - p1.x), p1.y + t * (p2.y - p1.y))
}

/// 射线法（奇偶规则）判断点是否在多边形内
///
/// 少于 3 个点的多边形没有定义，这里返回 `false`；
/// 调用方应把缺失或退化的车身轮廓视为“总是包含”。
pub fn point_in_polygon(point: Point, polygon: &[Point]) -> bool {
  if polygon.len() < 3 {
    return false;
  }

  let mut inside = false;
  let mut j = polygon.len() - 1;
  for i in 0..polygon.len() {
    let pi = polygon[i];
    let pj = polygon[j];
    if (pi.y > point.y) != (pj.y > point.y)
      && point.x < (pj.x - pi.x) * (point.y - pi.y) / (pj.y - pi.y) + pi.x
    {
      inside = !inside;
    }
    j = i;
  }

  inside
}
